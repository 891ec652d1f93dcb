//! REST API module for the authentication, profile, and permission services.
//!
//! This module provides the `ApiClient`, the request pipeline every outbound
//! call goes through: it attaches the current bearer credential, locale and a
//! correlation id, and on an expired-credential reply asks the bound
//! [`CredentialProvider`] for a fresh credential and retransmits once.
//!
//! The service traits let the session coordinator run against in-process
//! fakes as well as the real HTTP backend.

pub mod client;
pub mod error;
pub mod services;

pub use client::ApiClient;
pub use error::ApiError;
pub use services::{AuthService, CredentialProvider, PermissionService, ProfileService};
