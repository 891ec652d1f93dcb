use thiserror::Error;

use crate::api::ApiError;

/// Failure taxonomy for the session subsystem.
///
/// Any failure during renewal fails closed and sends the coordinator down the
/// reauthentication path. On an ordinary call only an expired-credential
/// reply triggers renewal; a `Parse` failure is returned as is.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Unexpected response shape: {0}")]
    Parse(String),

    #[error("Session storage error: {0}")]
    Storage(String),

    #[error("Cipher error: {0}")]
    Crypto(String),
}

impl SessionError {
    /// Whether this failure should invalidate the current session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SessionError::AuthRejected(_) | SessionError::Network(_))
    }
}

impl From<ApiError> for SessionError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => {
                SessionError::AuthRejected("credential expired or revoked".to_string())
            }
            ApiError::AccessDenied(body) => SessionError::AuthRejected(body),
            ApiError::NetworkError(e) => SessionError::Network(e.to_string()),
            ApiError::RateLimited => SessionError::Network("rate limited".to_string()),
            ApiError::Server { status, message } if status >= 500 => SessionError::Network(message),
            ApiError::Server { message, .. } => SessionError::AuthRejected(message),
            ApiError::NotFound(body) => SessionError::Parse(format!("not found: {}", body)),
            ApiError::InvalidResponse(msg) => SessionError::Parse(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
