//! Wire models for the authentication, profile, and permission services.
//!
//! - `TokenResponse`: login and refresh replies, plus expiry normalization
//! - `UserInfo`: the current user's profile
//! - `GrantedCodes`: access-grant codes for the current user

pub mod token;
pub mod user;

pub use token::{IssuedCredentials, TokenResponse};
pub use user::{GrantedCodes, UserInfo};
