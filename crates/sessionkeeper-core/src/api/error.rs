use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Error envelope returned by the backend for rejected calls.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    code: Option<i64>,
    message: Option<String>,
    reason: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Classify a non-success response.
    ///
    /// Bodies carrying the backend's `{code, message, reason}` envelope become
    /// `Server`; anything else that isn't a well-known status is reported as an
    /// unexpected shape.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            code => match serde_json::from_str::<ErrorEnvelope>(body) {
                Ok(envelope) if envelope.code.is_some() => ApiError::Server {
                    status: code,
                    message: envelope
                        .message
                        .or(envelope.reason)
                        .unwrap_or_else(|| truncated.clone()),
                },
                _ if (500..=599).contains(&code) => ApiError::Server {
                    status: code,
                    message: truncated,
                },
                _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
            },
        }
    }

    /// Whether the failure signals an expired or revoked access credential.
    pub fn is_credential_expired(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}
