//! In-process fakes for the coordinator's collaborators.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use sessionkeeper_core::api::{AuthService, PermissionService, ProfileService};
use sessionkeeper_core::auth::{
    Collaborators, CoordinatorOptions, CredentialEncoder, MemorySessionStore, SessionCoordinator,
};
use sessionkeeper_core::error::{Result, SessionError};
use sessionkeeper_core::models::{GrantedCodes, TokenResponse, UserInfo};
use sessionkeeper_core::ui::{Navigator, NotificationKind, Notifier};

pub const SHARED_SECRET: &str = "0123456789abcdef";
pub const LOGIN_PATH: &str = "/auth/login";

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap()
}

/// Token reply with lifetimes in seconds.
pub fn tokens(
    access: &str,
    refresh: Option<&str>,
    expires_in: Option<u64>,
    refresh_expires_in: Option<u64>,
) -> TokenResponse {
    TokenResponse {
        access_token: Some(access.to_string()),
        refresh_token: refresh.map(str::to_string),
        expires_in: expires_in.map(|s| json!(s)),
        refresh_expires_in: refresh_expires_in.map(|s| json!(s)),
        token_type: Some("Bearer".to_string()),
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Tokens(TokenResponse),
    Reject(String),
    Network,
    Parse,
}

impl Reply {
    fn into_result(self) -> Result<TokenResponse> {
        match self {
            Reply::Tokens(t) => Ok(t),
            Reply::Reject(msg) => Err(SessionError::AuthRejected(msg)),
            Reply::Network => Err(SessionError::Network("connection refused".into())),
            Reply::Parse => Err(SessionError::Parse("expected value at line 1".into())),
        }
    }
}

pub struct FakeAuth {
    login_reply: Mutex<Reply>,
    /// Consumed in order; the last one repeats.
    refresh_replies: Mutex<VecDeque<Reply>>,
    refresh_delay: Mutex<Option<Duration>>,
    logout_fails: Mutex<bool>,
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub last_login: Mutex<Option<(String, String)>>,
    pub last_refresh: Mutex<Option<String>>,
}

impl FakeAuth {
    pub fn new() -> Self {
        Self {
            login_reply: Mutex::new(Reply::Tokens(tokens(
                "access-1",
                Some("refresh-1"),
                Some(5400),
                Some(6000),
            ))),
            refresh_replies: Mutex::new(VecDeque::from([Reply::Tokens(tokens(
                "access-2",
                Some("refresh-2"),
                Some(5400),
                Some(6000),
            ))])),
            refresh_delay: Mutex::new(None),
            logout_fails: Mutex::new(false),
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            last_login: Mutex::new(None),
            last_refresh: Mutex::new(None),
        }
    }

    pub fn set_login(&self, reply: Reply) {
        *lock(&self.login_reply) = reply;
    }

    pub fn set_refresh(&self, reply: Reply) {
        *lock(&self.refresh_replies) = VecDeque::from([reply]);
    }

    /// Replies in completion order; the last one repeats.
    pub fn set_refresh_sequence(&self, replies: impl IntoIterator<Item = Reply>) {
        *lock(&self.refresh_replies) = replies.into_iter().collect();
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *lock(&self.refresh_delay) = Some(delay);
    }

    pub fn fail_logout(&self) {
        *lock(&self.logout_fails) = true;
    }

    pub fn logins(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthService for FakeAuth {
    async fn login(&self, identifier: &str, encoded_secret: &str) -> Result<TokenResponse> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_login) = Some((identifier.to_string(), encoded_secret.to_string()));
        let reply = lock(&self.login_reply).clone();
        reply.into_result()
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_refresh) = Some(refresh_token.to_string());
        let delay = *lock(&self.refresh_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let reply = {
            let mut replies = lock(&self.refresh_replies);
            if replies.len() > 1 {
                replies.pop_front()
            } else {
                replies.front().cloned()
            }
        };
        reply.unwrap_or(Reply::Network).into_result()
    }

    async fn logout(&self) -> Result<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if *lock(&self.logout_fails) {
            return Err(SessionError::Network("connection reset".into()));
        }
        Ok(())
    }
}

pub struct FakeProfile {
    pub user: Mutex<Option<UserInfo>>,
}

impl FakeProfile {
    pub fn new() -> Self {
        Self {
            user: Mutex::new(Some(UserInfo {
                id: Some(1),
                username: Some("admin".into()),
                realname: Some("Ada Admin".into()),
                roles: vec!["super".into()],
                ..Default::default()
            })),
        }
    }

    pub fn fail(&self) {
        *lock(&self.user) = None;
    }

    pub fn set_home_path(&self, path: &str) {
        if let Some(user) = lock(&self.user).as_mut() {
            user.home_path = Some(path.to_string());
        }
    }
}

#[async_trait]
impl ProfileService for FakeProfile {
    async fn current_user(&self) -> Result<UserInfo> {
        lock(&self.user)
            .clone()
            .ok_or_else(|| SessionError::Network("profile unavailable".into()))
    }
}

pub struct FakePermissions {
    pub codes: Mutex<Option<Vec<String>>>,
}

impl FakePermissions {
    pub fn new() -> Self {
        Self {
            codes: Mutex::new(Some(vec!["user:list".into(), "user:edit".into()])),
        }
    }

    pub fn fail(&self) {
        *lock(&self.codes) = None;
    }
}

#[async_trait]
impl PermissionService for FakePermissions {
    async fn granted_codes(&self) -> Result<GrantedCodes> {
        lock(&self.codes)
            .clone()
            .map(|codes| GrantedCodes { codes })
            .ok_or_else(|| SessionError::AuthRejected("no grants for this user".into()))
    }
}

pub struct RecordingNavigator {
    path: Mutex<(String, String)>,
    replace_delay: Mutex<Option<Duration>>,
    pub replaced: Mutex<Vec<(String, Vec<(String, String)>)>>,
    pub pushed: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self {
            path: Mutex::new((LOGIN_PATH.to_string(), LOGIN_PATH.to_string())),
            replace_delay: Mutex::new(None),
            replaced: Mutex::new(Vec::new()),
            pushed: Mutex::new(Vec::new()),
        }
    }

    /// Move to `path`, with `full` including any query.
    pub fn visit(&self, path: &str, full: &str) {
        *lock(&self.path) = (path.to_string(), full.to_string());
    }

    pub fn set_replace_delay(&self, delay: Duration) {
        *lock(&self.replace_delay) = Some(delay);
    }

    pub fn replaced(&self) -> Vec<(String, Vec<(String, String)>)> {
        lock(&self.replaced).clone()
    }

    pub fn pushed(&self) -> Vec<String> {
        lock(&self.pushed).clone()
    }
}

#[async_trait]
impl Navigator for RecordingNavigator {
    fn current_path(&self) -> String {
        lock(&self.path).0.clone()
    }

    fn current_full_path(&self) -> String {
        lock(&self.path).1.clone()
    }

    async fn replace(&self, path: &str, query: &[(String, String)]) {
        lock(&self.replaced).push((path.to_string(), query.to_vec()));
        let delay = *lock(&self.replace_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.visit(path, path);
    }

    async fn push(&self, path: &str) {
        lock(&self.pushed).push(path.to_string());
        self.visit(path, path);
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub seen: Mutex<Vec<(NotificationKind, String, String)>>,
}

impl RecordingNotifier {
    pub fn seen(&self) -> Vec<(NotificationKind, String, String)> {
        lock(&self.seen).clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.seen()
            .into_iter()
            .filter(|(kind, _, _)| *kind == NotificationKind::Error)
            .map(|(_, _, body)| body)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NotificationKind, title: &str, body: &str) {
        lock(&self.seen).push((kind, title.to_string(), body.to_string()));
    }
}

pub struct Harness {
    pub coordinator: Arc<SessionCoordinator>,
    pub auth: Arc<FakeAuth>,
    pub profile: Arc<FakeProfile>,
    pub permissions: Arc<FakePermissions>,
    pub store: Arc<MemorySessionStore>,
    pub navigator: Arc<RecordingNavigator>,
    pub notifier: Arc<RecordingNotifier>,
}

pub struct HarnessBuilder {
    options: CoordinatorOptions,
    secret: Option<String>,
    store: MemorySessionStore,
    auth: FakeAuth,
    profile: FakeProfile,
    permissions: FakePermissions,
    navigator: RecordingNavigator,
}

impl HarnessBuilder {
    pub fn options(mut self, f: impl FnOnce(&mut CoordinatorOptions)) -> Self {
        f(&mut self.options);
        self
    }

    pub fn secret(mut self, secret: Option<&str>) -> Self {
        self.secret = secret.map(str::to_string);
        self
    }

    pub fn store(mut self, store: MemorySessionStore) -> Self {
        self.store = store;
        self
    }

    pub fn auth(self, f: impl FnOnce(&FakeAuth)) -> Self {
        f(&self.auth);
        self
    }

    pub fn profile(self, f: impl FnOnce(&FakeProfile)) -> Self {
        f(&self.profile);
        self
    }

    pub fn permissions(self, f: impl FnOnce(&FakePermissions)) -> Self {
        f(&self.permissions);
        self
    }

    pub fn build(self) -> Harness {
        let auth = Arc::new(self.auth);
        let profile = Arc::new(self.profile);
        let permissions = Arc::new(self.permissions);
        let store = Arc::new(self.store);
        let navigator = Arc::new(self.navigator);
        let notifier = Arc::new(RecordingNotifier::default());

        let coordinator = SessionCoordinator::new(
            self.options,
            CredentialEncoder::new(self.secret),
            Collaborators {
                auth: auth.clone(),
                profile: profile.clone(),
                permissions: permissions.clone(),
                store: store.clone(),
                navigator: navigator.clone(),
                notifier: notifier.clone(),
            },
        );

        Harness {
            coordinator,
            auth,
            profile,
            permissions,
            store,
            navigator,
            notifier,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            options: CoordinatorOptions::default(),
            secret: Some(SHARED_SECRET.to_string()),
            store: MemorySessionStore::new(),
            auth: FakeAuth::new(),
            profile: FakeProfile::new(),
            permissions: FakePermissions::new(),
            navigator: RecordingNavigator::new(),
        }
    }

    pub fn new() -> Harness {
        Self::builder().build()
    }

    /// Sign in as `admin` and assert it worked.
    pub async fn logged_in(self) -> Harness {
        let user = self.coordinator.login("admin", "admin123", None).await;
        assert!(user.is_some(), "login should succeed");
        self
    }
}
