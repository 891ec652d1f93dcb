use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reply shape shared by `Login` and `RefreshToken`.
///
/// Lifetimes arrive as seconds and may be numbers or numeric strings, so they
/// are kept as raw JSON until normalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<Value>,
    pub refresh_expires_in: Option<Value>,
    pub token_type: Option<String>,
}

/// Credentials with absolute expiry instants, ready to be stored as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCredentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl TokenResponse {
    /// Convert server lifetimes into absolute instants.
    ///
    /// Absent, non-numeric, or non-positive lifetimes fall back to
    /// `now + default_access` / `now + default_refresh`.
    pub fn normalize(
        &self,
        default_access: Duration,
        default_refresh: Duration,
        now: DateTime<Utc>,
    ) -> IssuedCredentials {
        IssuedCredentials {
            access_token: non_empty(self.access_token.as_deref()),
            refresh_token: non_empty(self.refresh_token.as_deref()),
            access_expires_at: expiry_from(self.expires_in.as_ref(), default_access, now),
            refresh_expires_at: expiry_from(self.refresh_expires_in.as_ref(), default_refresh, now),
        }
    }
}

fn non_empty(token: Option<&str>) -> Option<String> {
    token.filter(|t| !t.is_empty()).map(str::to_string)
}

/// Parse a lifetime in seconds, rejecting anything that isn't a finite
/// positive number.
pub fn lifetime_seconds(value: Option<&Value>) -> Option<f64> {
    let secs = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

/// Absolute expiry for a server-supplied lifetime.
pub fn expiry_from(value: Option<&Value>, default: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    lifetime_seconds(value)
        .and_then(|secs| {
            let millis = (secs * 1000.0).floor();
            if millis > i64::MAX as f64 {
                return None;
            }
            now.checked_add_signed(Duration::milliseconds(millis as i64))
        })
        .unwrap_or(now + default)
}
