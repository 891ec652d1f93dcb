use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::{GrantedCodes, TokenResponse, UserInfo};

/// Body of `Login` and `RefreshToken`.
#[derive(Debug, Clone, Serialize)]
pub struct TokenRequest {
    pub grant_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenRequest {
    pub fn password(username: &str, encoded_password: String) -> Self {
        Self {
            grant_type: "password",
            username: Some(username.to_string()),
            password: Some(encoded_password),
            refresh_token: None,
        }
    }

    pub fn refresh(refresh_token: &str) -> Self {
        Self {
            grant_type: "refresh_token",
            username: None,
            password: None,
            refresh_token: Some(refresh_token.to_string()),
        }
    }
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn login(&self, identifier: &str, encoded_secret: &str) -> Result<TokenResponse>;
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse>;
    async fn logout(&self) -> Result<()>;
}

#[async_trait]
pub trait ProfileService: Send + Sync {
    async fn current_user(&self) -> Result<UserInfo>;
}

#[async_trait]
pub trait PermissionService: Send + Sync {
    async fn granted_codes(&self) -> Result<GrantedCodes>;
}

/// Source of the bearer credential for the request pipeline.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn access_credential(&self) -> Option<String>;

    /// A call came back with an expired-credential signal. Returns a fresh
    /// credential to retransmit with, or `None` when recovery has been
    /// handed to reauthentication.
    async fn on_credential_expired(&self) -> Option<String>;
}
