//! Authentication module: session state and its lifecycle.
//!
//! This module provides:
//! - `CredentialEncoder`: shared-secret encoding of the login password
//! - `SessionState`: credentials, expiries and the checked/expired flags
//! - `SessionStore`: durable storage (file, OS keychain, memory)
//! - `RefreshScheduler`: proactive renewal before the refresh credential expires
//! - `ReauthGuard`: single-flight reauthentication
//! - `SessionCoordinator`: login, logout, renewal and reauthentication

pub mod coordinator;
pub mod encoder;
pub mod guard;
pub mod scheduler;
pub mod session;
pub mod store;

pub use coordinator::{
    Collaborators, CoordinatorOptions, SessionCoordinator, SessionEvent, SessionPhase,
};
pub use encoder::CredentialEncoder;
pub use guard::ReauthGuard;
pub use scheduler::{RefreshPolicy, RefreshScheduler, RefreshTarget};
pub use session::{SessionData, SessionState};
pub use store::{FileSessionStore, KeyringSessionStore, MemorySessionStore, SessionStore};
