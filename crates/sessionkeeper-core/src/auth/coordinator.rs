//! Session coordinator: login, logout, proactive and reactive renewal, and
//! reauthentication.
//!
//! ## Lifecycle
//!
//! ```text
//! LoggedOut ──login()──→ LoggingIn ──ok──→ Active ──logout()──→ LoggedOut
//!                            │                │
//!                            └──fail──→ LoggedOut
//!                                             │ renewal failed
//!                                             ▼
//!                                     Reauthenticating ──→ ExpiredSoft ──login()──→ Active
//!                                             │
//!                                             └──────────→ LoggedOut
//! ```
//!
//! # Concurrency
//!
//! Session state sits behind a `std::sync::Mutex` that is never held across
//! an await: each mutation computes the full new credentials first and
//! applies them in one locked step. Concurrent renewals share one spawned
//! task, detached from the session on logout; concurrent reauthentications
//! are dropped by [`ReauthGuard`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use super::{
    CredentialEncoder, ReauthGuard, RefreshPolicy, RefreshScheduler, RefreshTarget, SessionData,
    SessionState, SessionStore,
};
use crate::api::{ApiClient, AuthService, CredentialProvider, PermissionService, ProfileService};
use crate::config::{Config, LoginExpiredMode};
use crate::error::{Result, SessionError};
use crate::models::{IssuedCredentials, TokenResponse, UserInfo};
use crate::ui::{Navigator, NotificationKind, Notifier};

const LOGIN_FAILED_TITLE: &str = "Login failed";
const LOGIN_FAILED_DESC: &str =
    "Unable to sign in. Check your username and password, then try again.";
const LOGIN_SUCCESS_TITLE: &str = "Login successful";
const LOGIN_SUCCESS_DESC: &str = "Welcome back";

/// Query key carrying the return path on the login view
pub const REDIRECT_QUERY_KEY: &str = "redirect";

/// Capacity of the session event channel
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    LoggedOut,
    LoggingIn,
    Active,
    ExpiredSoft,
    Reauthenticating,
}

/// Fan-out notifications for the rest of the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    Renewed,
    LoginExpired,
    /// Everything derived from the session must be dropped.
    Reset,
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub login_expired_mode: LoginExpiredMode,
    pub enable_refresh_token: bool,
    pub login_path: String,
    pub default_home_path: String,
    pub policy: RefreshPolicy,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for CoordinatorOptions {
    fn from(config: &Config) -> Self {
        Self {
            login_expired_mode: config.login_expired_mode,
            enable_refresh_token: config.enable_refresh_token,
            login_path: config.login_path.clone(),
            default_home_path: config.default_home_path.clone(),
            policy: RefreshPolicy::default(),
        }
    }
}

/// External services the coordinator drives.
pub struct Collaborators {
    pub auth: Arc<dyn AuthService>,
    pub profile: Arc<dyn ProfileService>,
    pub permissions: Arc<dyn PermissionService>,
    pub store: Arc<dyn SessionStore>,
    pub navigator: Arc<dyn Navigator>,
    pub notifier: Arc<dyn Notifier>,
}

enum LoginFailure {
    /// Login call, encoding, or grant fetch failed: clean up and notify.
    Rejected(SessionError),
    /// Profile fetch failed: clean up quietly.
    Profile(SessionError),
}

type RenewalFuture = Shared<BoxFuture<'static, String>>;

/// The renewal callers currently join. Tagged so a finished task only
/// clears its own entry.
struct InFlightRenewal {
    id: u64,
    result: RenewalFuture,
}

pub struct SessionCoordinator {
    me: Weak<SessionCoordinator>,
    options: CoordinatorOptions,
    encoder: CredentialEncoder,
    auth: Arc<dyn AuthService>,
    profile: Arc<dyn ProfileService>,
    permissions: Arc<dyn PermissionService>,
    store: Arc<dyn SessionStore>,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<SessionState>,
    user: Mutex<Option<UserInfo>>,
    phase: Mutex<SessionPhase>,
    scheduler: RefreshScheduler,
    reauth: ReauthGuard,
    renewal: Mutex<Option<InFlightRenewal>>,
    renewal_seq: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
    login_expired: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SessionCoordinator {
    pub fn new(
        options: CoordinatorOptions,
        encoder: CredentialEncoder,
        collaborators: Collaborators,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (login_expired, _) = watch::channel(false);
        let scheduler = RefreshScheduler::new(options.policy);

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            options,
            encoder,
            auth: collaborators.auth,
            profile: collaborators.profile,
            permissions: collaborators.permissions,
            store: collaborators.store,
            navigator: collaborators.navigator,
            notifier: collaborators.notifier,
            state: Mutex::new(SessionState::new()),
            user: Mutex::new(None),
            phase: Mutex::new(SessionPhase::LoggedOut),
            scheduler,
            reauth: ReauthGuard::new(),
            renewal: Mutex::new(None),
            renewal_seq: AtomicU64::new(0),
            events,
            login_expired,
        })
    }

    /// Wire a coordinator to the HTTP backend and bind it as the client's
    /// credential source.
    pub fn connect(
        config: &Config,
        client: ApiClient,
        store: Arc<dyn SessionStore>,
        navigator: Arc<dyn Navigator>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let client = Arc::new(client);
        let coordinator = Self::new(
            CoordinatorOptions::from(config),
            CredentialEncoder::new(config.shared_secret.clone()),
            Collaborators {
                auth: client.clone(),
                profile: client.clone(),
                permissions: client.clone(),
                store,
                navigator,
                notifier,
            },
        );
        let provider: Arc<dyn CredentialProvider> = coordinator.clone();
        client.bind_credentials(Arc::downgrade(&provider));
        coordinator
    }

    // ===== Read access =====

    pub fn phase(&self) -> SessionPhase {
        *lock(&self.phase)
    }

    pub fn is_logged_in(&self) -> bool {
        lock(&self.state).access_token().is_some()
    }

    pub fn access_credential(&self) -> Option<String> {
        lock(&self.state).access_token().map(str::to_string)
    }

    pub fn login_expired(&self) -> bool {
        lock(&self.state).login_expired()
    }

    /// Reactive view of the login-expired flag, for a re-login prompt.
    pub fn watch_login_expired(&self) -> watch::Receiver<bool> {
        self.login_expired.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn access_codes(&self) -> Vec<String> {
        lock(&self.state).access_codes().to_vec()
    }

    pub fn user_info(&self) -> Option<UserInfo> {
        lock(&self.user).clone()
    }

    pub fn session_snapshot(&self) -> SessionData {
        lock(&self.state).data().clone()
    }

    pub fn access_checked(&self) -> bool {
        lock(&self.state).access_checked()
    }

    pub fn is_access_expired(&self) -> bool {
        lock(&self.state).is_access_expired(Utc::now())
    }

    pub fn is_refresh_scheduled(&self) -> bool {
        self.scheduler.is_armed()
    }

    pub fn scheduled_refresh_interval(&self) -> Option<Duration> {
        self.scheduler.scheduled_interval()
    }

    /// Record that an access-control evaluation has completed.
    pub fn mark_access_checked(&self) {
        lock(&self.state).set_checked(true);
    }

    // ===== State plumbing =====

    fn set_phase(&self, phase: SessionPhase) {
        let mut current = lock(&self.phase);
        if *current != phase {
            debug!(from = ?*current, to = ?phase, "Session phase changed");
            *current = phase;
        }
    }

    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Apply `f` under the lock, then persist the result.
    fn mutate<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> Result<R> {
        let (result, data, expired) = {
            let mut state = lock(&self.state);
            let result = f(&mut state);
            (result, state.data().clone(), state.login_expired())
        };
        self.login_expired.send_replace(expired);
        self.store
            .save(&data)
            .map_err(|e| SessionError::Storage(format!("{:#}", e)))?;
        Ok(result)
    }

    fn arm_scheduler(&self) {
        let expires_at = lock(&self.state).refresh_expires_at();
        let target: Arc<dyn RefreshTarget> = Arc::new(ScheduledRenewal {
            coordinator: self.me.clone(),
        });
        self.scheduler.arm(target, expires_at, Utc::now());
    }

    fn normalize(&self, resp: &TokenResponse, now: DateTime<Utc>) -> IssuedCredentials {
        let policy = &self.options.policy;
        resp.normalize(
            policy.default_access_lifetime(),
            policy.default_refresh_lifetime(),
            now,
        )
    }

    /// Load the persisted session. Call once at startup.
    ///
    /// Returns whether a usable session was found. A live refresh credential
    /// re-arms proactive renewal.
    pub fn restore(&self) -> Result<bool> {
        let Some(data) = self
            .store
            .load()
            .map_err(|e| SessionError::Storage(format!("{:#}", e)))?
        else {
            return Ok(false);
        };

        let now = Utc::now();
        let (has_access, has_refresh) = self.mutate(|s| {
            *s = SessionState::from_data(data);
            if s.refresh_token().is_some() && s.is_refresh_expired(now) {
                s.clear_refresh_credential();
            }
            (s.access_token().is_some(), s.refresh_token().is_some())
        })?;

        if has_refresh {
            self.arm_scheduler();
        }
        let restored = has_access || has_refresh;
        self.set_phase(if restored {
            SessionPhase::Active
        } else {
            SessionPhase::LoggedOut
        });
        info!(restored, has_refresh, "Session restored from storage");
        Ok(restored)
    }

    // ===== Login =====

    /// Sign in and load the user's profile and access-grant codes.
    ///
    /// Navigates to `redirect_to`, else the user's home path, else the
    /// configured default, unless this login resolves a soft expiry, in which
    /// case the current view is kept. Returns `None` after cleaning up on any
    /// failure.
    pub async fn login(
        &self,
        identifier: &str,
        secret: &str,
        redirect_to: Option<&str>,
    ) -> Option<UserInfo> {
        self.set_phase(SessionPhase::LoggingIn);

        match self.try_login(identifier, secret, redirect_to).await {
            Ok(user) => Some(user),
            Err(LoginFailure::Profile(e)) => {
                warn!(error = %e, "Failed to fetch user profile, aborting login");
                self.teardown(true).await;
                None
            }
            Err(LoginFailure::Rejected(e)) => {
                warn!(error = %e, "Login failed");
                self.teardown(true).await;
                let body = match &e {
                    SessionError::AuthRejected(msg) | SessionError::Configuration(msg)
                        if !msg.is_empty() =>
                    {
                        msg.as_str()
                    }
                    _ => LOGIN_FAILED_DESC,
                };
                self.notifier
                    .notify(NotificationKind::Error, LOGIN_FAILED_TITLE, body);
                None
            }
        }
    }

    async fn try_login(
        &self,
        identifier: &str,
        secret: &str,
        redirect_to: Option<&str>,
    ) -> std::result::Result<UserInfo, LoginFailure> {
        let encoded = self
            .encoder
            .encode_secret(secret)
            .map_err(LoginFailure::Rejected)?;
        let resp = self
            .auth
            .login(identifier, &encoded)
            .await
            .map_err(LoginFailure::Rejected)?;

        let creds = self.normalize(&resp, Utc::now());
        if creds.access_token.is_none() {
            return Err(LoginFailure::Rejected(SessionError::AuthRejected(
                "login response carried no access credential".to_string(),
            )));
        }
        let has_refresh = creds.refresh_token.is_some();

        let was_expired = self
            .mutate(|s| {
                let was_expired = s.login_expired();
                s.apply(&creds);
                was_expired
            })
            .map_err(LoginFailure::Rejected)?;

        if has_refresh {
            self.arm_scheduler();
        }

        let (user, codes) = tokio::join!(self.profile.current_user(), self.permissions.granted_codes());
        let user = user.map_err(LoginFailure::Profile)?;
        let codes = codes.map_err(LoginFailure::Rejected)?;

        self.mutate(|s| s.set_access_codes(codes.codes))
            .map_err(LoginFailure::Rejected)?;
        *lock(&self.user) = Some(user.clone());

        self.set_phase(SessionPhase::Active);
        self.emit(SessionEvent::LoggedIn);
        info!(user = %user.display_name(), resumed = was_expired, "Logged in");

        if !was_expired {
            let target = redirect_to
                .map(str::to_string)
                .or_else(|| user.home_path.clone().filter(|p| !p.is_empty()))
                .unwrap_or_else(|| self.options.default_home_path.clone());
            self.navigator.push(&target).await;
        }

        if let Some(name) = user.realname.as_deref().filter(|n| !n.is_empty()) {
            self.notifier.notify(
                NotificationKind::Success,
                LOGIN_SUCCESS_TITLE,
                &format!("{}: {}", LOGIN_SUCCESS_DESC, name),
            );
        }

        Ok(user)
    }

    // ===== Renewal =====

    /// Obtain a fresh access credential with the refresh credential.
    ///
    /// Never fails: on any error reauthentication is triggered and an empty
    /// string returned. Concurrent callers share one in-flight renewal, which
    /// runs as its own task and finishes even if every caller gives up.
    pub async fn renew_access_credential(&self) -> String {
        match self.join_or_start_renewal() {
            Some(renewal) => renewal.await,
            None => self.renew_once().await,
        }
    }

    /// `None` when no runtime is available to host a shared renewal.
    fn join_or_start_renewal(&self) -> Option<RenewalFuture> {
        let mut slot = lock(&self.renewal);
        if let Some(in_flight) = slot.as_ref() {
            debug!(renewal = in_flight.id, "Joining in-flight credential renewal");
            return Some(in_flight.result.clone());
        }

        let me = self.me.upgrade()?;
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let id = self.renewal_seq.fetch_add(1, Ordering::Relaxed);
        let task = runtime.spawn(async move {
            let token = me.renew_once().await;
            me.finish_renewal(id);
            token
        });
        let result = async move {
            task.await.unwrap_or_else(|e| {
                error!(error = %e, "Credential renewal task failed");
                String::new()
            })
        }
        .boxed()
        .shared();

        *slot = Some(InFlightRenewal {
            id,
            result: result.clone(),
        });
        Some(result)
    }

    fn finish_renewal(&self, id: u64) {
        let mut slot = lock(&self.renewal);
        if slot.as_ref().is_some_and(|r| r.id == id) {
            *slot = None;
        }
    }

    /// Later callers start over instead of joining a renewal begun for a
    /// session that no longer exists.
    fn detach_renewal(&self) {
        if let Some(in_flight) = lock(&self.renewal).take() {
            debug!(renewal = in_flight.id, "Detached in-flight renewal from the session");
        }
    }

    fn holds_refresh_credential(&self, refresh: &str) -> bool {
        lock(&self.state).refresh_token() == Some(refresh)
    }

    /// Reauthenticate unless the session already moved on from `refresh`.
    async fn escalate(&self, refresh: &str) {
        if self.holds_refresh_credential(refresh) {
            self.reauthenticate().await;
        } else {
            debug!("Session changed during renewal, not reauthenticating");
        }
    }

    async fn renew_once(&self) -> String {
        let refresh = lock(&self.state).refresh_token().map(str::to_string);
        let Some(refresh) = refresh else {
            debug!("No refresh credential, escalating to reauthentication");
            self.reauthenticate().await;
            return String::new();
        };

        let resp = match self.auth.refresh_token(&refresh).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(
                    error = %e,
                    auth_failure = e.is_auth_failure(),
                    "Failed to refresh access credential"
                );
                self.escalate(&refresh).await;
                return String::new();
            }
        };

        let issued = self.normalize(&resp, Utc::now());
        let Some(access) = issued.access_token.clone() else {
            warn!("Refresh response carried no access credential");
            self.escalate(&refresh).await;
            return String::new();
        };

        let applied = self.mutate(|s| {
            // logout or reauthentication won the race; drop this result
            if s.refresh_token() != Some(refresh.as_str()) {
                return false;
            }
            // an unrotated refresh credential keeps its current expiry
            if let Some(rotated) = issued.refresh_token.clone() {
                s.set_refresh_credential(rotated, issued.refresh_expires_at);
            }
            s.set_access_credential(access.clone(), issued.access_expires_at);
            true
        });

        match applied {
            Ok(true) => {
                debug!("Access credential renewed");
                self.emit(SessionEvent::Renewed);
                access
            }
            Ok(false) => {
                debug!("Session changed during renewal, discarding result");
                String::new()
            }
            Err(e) => {
                error!(error = %e, "Failed to persist renewed credentials");
                self.reauthenticate().await;
                String::new()
            }
        }
    }

    // ===== Reauthentication =====

    /// Invalidate the session after an unrecoverable expiry.
    ///
    /// Runs at most once at a time; calls made while one is in flight return
    /// immediately.
    pub async fn reauthenticate(&self) {
        match self.reauth.run_exclusive(|| self.reauthenticate_once()).await {
            None => debug!("Reauthentication already in progress"),
            Some(Err(e)) => {
                error!(error = %e, "Reauthentication failed");
                self.set_phase(SessionPhase::LoggedOut);
            }
            Some(Ok(())) => {}
        }
    }

    async fn reauthenticate_once(&self) -> Result<()> {
        warn!("Access or refresh credential is invalid or expired");
        self.set_phase(SessionPhase::Reauthenticating);
        self.scheduler.disarm();
        self.detach_renewal();

        let was_checked = self.mutate(|s| {
            let was_checked = s.access_checked();
            s.clear_access_credential();
            s.clear_refresh_credential();
            s.set_checked(false);
            s.set_access_codes(Vec::new());
            was_checked
        })?;

        if self.options.login_expired_mode == LoginExpiredMode::Modal && was_checked {
            self.mutate(|s| s.set_login_expired(true))?;
            self.set_phase(SessionPhase::ExpiredSoft);
            self.emit(SessionEvent::LoginExpired);
            info!("Session expired, awaiting in-place re-login");
            return Ok(());
        }

        self.logout(true).await;
        Ok(())
    }

    // ===== Logout =====

    /// Sign out. Always succeeds locally.
    ///
    /// With `redirect`, the login view receives the current location so the
    /// user lands back on it after signing in again.
    pub async fn logout(&self, redirect: bool) {
        if self.is_logged_in() {
            if let Err(e) = self.auth.logout().await {
                debug!(error = %e, "Server logout failed, continuing with local logout");
            }
        }
        self.teardown(redirect).await;
    }

    async fn teardown(&self, redirect: bool) {
        self.scheduler.disarm();
        self.detach_renewal();

        lock(&self.state).reset();
        lock(&self.user).take();
        if let Err(e) = self.store.clear() {
            error!(error = %format!("{:#}", e), "Failed to clear persisted session");
        }
        self.login_expired.send_replace(false);
        self.set_phase(SessionPhase::LoggedOut);
        self.emit(SessionEvent::Reset);

        if self.navigator.current_path() == self.options.login_path {
            return;
        }
        let query = if redirect {
            vec![(
                REDIRECT_QUERY_KEY.to_string(),
                self.navigator.current_full_path(),
            )]
        } else {
            Vec::new()
        };
        self.navigator.replace(&self.options.login_path, &query).await;
    }
}

#[async_trait]
impl CredentialProvider for SessionCoordinator {
    fn access_credential(&self) -> Option<String> {
        SessionCoordinator::access_credential(self)
    }

    async fn on_credential_expired(&self) -> Option<String> {
        if !self.options.enable_refresh_token {
            self.reauthenticate().await;
            return None;
        }
        let token = self.renew_access_credential().await;
        (!token.is_empty()).then_some(token)
    }
}

/// Scheduler-facing handle; weak so the timer never keeps a coordinator alive.
struct ScheduledRenewal {
    coordinator: Weak<SessionCoordinator>,
}

#[async_trait]
impl RefreshTarget for ScheduledRenewal {
    fn has_refresh_credential(&self) -> bool {
        self.coordinator
            .upgrade()
            .is_some_and(|c| {
                let state = lock(&c.state);
                state.refresh_token().is_some()
            })
    }

    fn refresh_expires_at(&self) -> Option<DateTime<Utc>> {
        self.coordinator
            .upgrade()
            .and_then(|c| {
                let state = lock(&c.state);
                state.refresh_expires_at()
            })
    }

    async fn refresh(&self) -> Result<()> {
        let Some(coordinator) = self.coordinator.upgrade() else {
            return Ok(());
        };
        if coordinator.renew_access_credential().await.is_empty() {
            return Err(SessionError::AuthRejected(
                "scheduled renewal did not yield a credential".to_string(),
            ));
        }
        Ok(())
    }

    async fn on_missing_credential(&self) {
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.reauthenticate().await;
        }
    }
}
