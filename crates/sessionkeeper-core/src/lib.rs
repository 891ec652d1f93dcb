//! Session and token-lifecycle coordination for long-lived API clients.
//!
//! The [`SessionCoordinator`](auth::SessionCoordinator) signs users in,
//! renews access credentials before they expire, recovers when a call reports
//! expiry early, and tears the session down exactly once when recovery is
//! impossible. The [`ApiClient`](api::ApiClient) is the request pipeline
//! through which every call picks up the current credential.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod ui;

pub use api::ApiClient;
pub use auth::{SessionCoordinator, SessionEvent, SessionPhase};
pub use config::{Config, LoginExpiredMode};
pub use error::SessionError;
