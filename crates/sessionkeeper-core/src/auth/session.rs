use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::IssuedCredentials;

/// The persisted part of a session.
///
/// Page-lifetime flags live on [`SessionState`] and are never written out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub access_expires_at: Option<DateTime<Utc>>,
    pub refresh_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_codes: Vec<String>,
}

impl SessionData {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }

    /// Drop credentials whose expiry is missing, so a hand-edited or
    /// truncated file can't produce a credential without an expiry.
    pub fn sanitized(mut self) -> Self {
        if self.access_expires_at.is_none() {
            self.access_token = None;
        }
        if self.refresh_expires_at.is_none() {
            self.refresh_token = None;
        }
        self
    }
}

/// Current credentials plus the access-checked and login-expired flags.
///
/// Every setter changes a credential together with its expiry, so a reader
/// never sees a token without one. Setting `login_expired` drops the access
/// credential.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    data: SessionData,
    access_checked: bool,
    login_expired: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_data(data: SessionData) -> Self {
        Self {
            data: data.sanitized(),
            access_checked: false,
            login_expired: false,
        }
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub fn access_token(&self) -> Option<&str> {
        self.data.access_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.data.refresh_token.as_deref()
    }

    pub fn access_expires_at(&self) -> Option<DateTime<Utc>> {
        self.data.access_expires_at
    }

    pub fn refresh_expires_at(&self) -> Option<DateTime<Utc>> {
        self.data.refresh_expires_at
    }

    pub fn access_codes(&self) -> &[String] {
        &self.data.access_codes
    }

    pub fn access_checked(&self) -> bool {
        self.access_checked
    }

    pub fn login_expired(&self) -> bool {
        self.login_expired
    }

    pub fn set_access_credential(&mut self, token: String, expires_at: DateTime<Utc>) {
        self.data.access_token = Some(token);
        self.data.access_expires_at = Some(expires_at);
        self.login_expired = false;
    }

    pub fn clear_access_credential(&mut self) {
        self.data.access_token = None;
    }

    pub fn set_refresh_credential(&mut self, token: String, expires_at: DateTime<Utc>) {
        self.data.refresh_token = Some(token);
        self.data.refresh_expires_at = Some(expires_at);
    }

    pub fn clear_refresh_credential(&mut self) {
        self.data.refresh_token = None;
    }

    pub fn set_access_codes(&mut self, codes: Vec<String>) {
        self.data.access_codes = codes;
    }

    pub fn set_checked(&mut self, checked: bool) {
        self.access_checked = checked;
    }

    pub fn set_login_expired(&mut self, expired: bool) {
        if expired {
            self.data.access_token = None;
        }
        self.login_expired = expired;
    }

    /// Replace both credentials and both expiries in one step.
    ///
    /// A missing token in `creds` clears the corresponding credential.
    pub fn apply(&mut self, creds: &IssuedCredentials) {
        self.data.access_expires_at = Some(creds.access_expires_at);
        self.data.refresh_expires_at = Some(creds.refresh_expires_at);
        self.data.access_token = creds.access_token.clone();
        self.data.refresh_token = creds.refresh_token.clone();
        if self.data.access_token.is_some() {
            self.login_expired = false;
        }
    }

    /// Absent expiry counts as expired.
    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        self.data.access_expires_at.map_or(true, |at| now >= at)
    }

    /// Absent expiry counts as expired.
    pub fn is_refresh_expired(&self, now: DateTime<Utc>) -> bool {
        self.data.refresh_expires_at.map_or(true, |at| now >= at)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn issued(now: DateTime<Utc>) -> IssuedCredentials {
        IssuedCredentials {
            access_token: Some("access-1".into()),
            refresh_token: Some("refresh-1".into()),
            access_expires_at: now + Duration::minutes(30),
            refresh_expires_at: now + Duration::hours(12),
        }
    }

    #[test]
    fn test_absent_expiry_is_expired() {
        let state = SessionState::new();
        let now = Utc::now();
        assert!(state.is_access_expired(now));
        assert!(state.is_refresh_expired(now));
    }

    #[test]
    fn test_expiry_boundaries() {
        let now = Utc::now();
        let mut state = SessionState::new();
        state.apply(&issued(now));
        assert!(!state.is_access_expired(now));
        assert!(state.is_access_expired(now + Duration::minutes(30)));
        assert!(!state.is_refresh_expired(now + Duration::hours(11)));
        assert!(state.is_refresh_expired(now + Duration::hours(13)));
    }

    #[test]
    fn test_apply_sets_credentials_with_expiry() {
        let now = Utc::now();
        let mut state = SessionState::new();
        state.apply(&issued(now));
        assert_eq!(state.access_token(), Some("access-1"));
        assert_eq!(state.refresh_token(), Some("refresh-1"));
        assert_eq!(state.access_expires_at(), Some(now + Duration::minutes(30)));
        assert_eq!(state.refresh_expires_at(), Some(now + Duration::hours(12)));
    }

    #[test]
    fn test_login_expired_drops_access_credential() {
        let mut state = SessionState::new();
        state.apply(&issued(Utc::now()));
        state.set_login_expired(true);
        assert!(state.login_expired());
        assert_eq!(state.access_token(), None);

        state.set_access_credential("access-2".into(), Utc::now());
        assert!(!state.login_expired());
    }

    #[test]
    fn test_rotating_refresh_credential_leaves_access_alone() {
        let now = Utc::now();
        let mut state = SessionState::new();
        state.apply(&issued(now));

        state.set_refresh_credential("refresh-2".into(), now + Duration::hours(20));

        assert_eq!(state.refresh_token(), Some("refresh-2"));
        assert_eq!(state.refresh_expires_at(), Some(now + Duration::hours(20)));
        assert_eq!(state.access_token(), Some("access-1"));
        assert_eq!(state.access_expires_at(), Some(now + Duration::minutes(30)));
        assert!(!state.is_refresh_expired(now + Duration::hours(19)));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut state = SessionState::new();
        state.apply(&issued(Utc::now()));
        state.set_checked(true);
        state.set_access_codes(vec!["system:user:list".into()]);

        state.reset();
        let once = state.data().clone();
        state.reset();
        assert_eq!(state.data(), &once);
        assert_eq!(once, SessionData::default());
        assert!(!state.access_checked());
        assert!(!state.login_expired());
    }

    #[test]
    fn test_from_data_sanitizes_missing_expiry() {
        let data = SessionData {
            access_token: Some("a".into()),
            refresh_token: Some("r".into()),
            access_expires_at: None,
            refresh_expires_at: Some(Utc::now()),
            access_codes: vec![],
        };
        let state = SessionState::from_data(data);
        assert_eq!(state.access_token(), None);
        assert_eq!(state.refresh_token(), Some("r"));
    }
}
