//! HTTP request pipeline and service clients.
//!
//! Every call made through [`ApiClient::get`]/[`ApiClient::post`] carries the
//! current bearer credential, the configured locale and an `X-Request-ID`.
//! An expired-credential reply is handed to the bound [`CredentialProvider`]
//! and, if it yields a fresh credential, the call is retransmitted once with
//! the same request id.

use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::services::TokenRequest;
use super::{ApiError, AuthService, CredentialProvider, PermissionService, ProfileService};
use crate::models::{GrantedCodes, TokenResponse, UserInfo};

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/admin/v1/login";
const REFRESH_TOKEN_PATH: &str = "/admin/v1/refresh_token";
const LOGOUT_PATH: &str = "/admin/v1/logout";
const CURRENT_USER_PATH: &str = "/admin/v1/me";
const PERMISSION_CODES_PATH: &str = "/admin/v1/perm-codes";

/// Correlation id header, echoed back by the backend in its logs
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const REQUESTED_WITH_HEADER: &str = "x-requested-with";

/// HTTP request timeout in seconds.
/// Renewal and reauthentication rely on this instead of their own timeouts.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

type ProviderSlot = Arc<RwLock<Option<Weak<dyn CredentialProvider>>>>;

/// API client for the admin backend.
/// Clone is cheap - reqwest::Client and the provider slot are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    locale: String,
    provider: ProviderSlot,
}

impl ApiClient {
    pub fn new(base_url: &str, locale: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            locale: locale.to_string(),
            provider: Arc::new(RwLock::new(None)),
        })
    }

    /// Attach the credential source consulted before and after each call.
    ///
    /// Held weakly: the provider usually owns this client.
    pub fn bind_credentials(&self, provider: Weak<dyn CredentialProvider>) {
        *self.provider.write().unwrap_or_else(|e| e.into_inner()) = Some(provider);
    }

    fn credentials(&self) -> Option<Arc<dyn CredentialProvider>> {
        self.provider
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Headers for one transmission of a call.
    pub fn request_headers(
        &self,
        request_id: &str,
        token: Option<&str>,
    ) -> Result<header::HeaderMap, ApiError> {
        let invalid = |e: header::InvalidHeaderValue| ApiError::InvalidResponse(e.to_string());

        let mut headers = header::HeaderMap::new();
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token)).map_err(invalid)?,
            );
        }
        headers.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_str(&self.locale).map_err(invalid)?,
        );
        headers.insert(
            REQUEST_ID_HEADER,
            header::HeaderValue::from_str(request_id).map_err(invalid)?,
        );
        headers.insert(
            REQUESTED_WITH_HEADER,
            header::HeaderValue::from_static("XMLHttpRequest"),
        );
        Ok(headers)
    }

    /// Send through the full pipeline, generating a request id.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(Method::GET, path, None, None).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, ApiError> {
        self.send(Method::POST, path, Some(body), None).await
    }

    /// Send through the full pipeline.
    ///
    /// A caller-supplied `request_id` is kept; otherwise a UUIDv4 is used.
    pub async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        request_id: Option<String>,
    ) -> Result<T, ApiError> {
        let request_id = request_id.unwrap_or_else(new_request_id);
        let provider = self.credentials();
        let token = provider.as_ref().and_then(|p| p.access_credential());

        let err = match self
            .execute(method.clone(), path, body.as_ref(), &request_id, token.as_deref())
            .await
        {
            Err(e) if e.is_credential_expired() => e,
            other => return other,
        };

        let Some(provider) = provider else {
            return Err(err);
        };
        match provider.on_credential_expired().await {
            Some(fresh) => {
                debug!(path, request_id = %request_id, "Retransmitting with renewed credential");
                self.execute(method, path, body.as_ref(), &request_id, Some(&fresh))
                    .await
            }
            None => Err(err),
        }
    }

    /// One logical transmission, retrying only on rate limiting.
    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        request_id: &str,
        token: Option<&str>,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .headers(self.request_headers(request_id, token)?);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await?;

            let status = response.status();
            if status.as_u16() == 429 {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2; // Exponential backoff
                continue;
            }

            let text = response.text().await?;
            if !status.is_success() {
                return Err(ApiError::from_status(status, &text));
            }
            return parse_body(&text)
                .map_err(|e| ApiError::InvalidResponse(format!("{} {}: {}", method, path, e)));
        }
    }
}

fn parse_body<T: DeserializeOwned>(text: &str) -> serde_json::Result<T> {
    if text.trim().is_empty() {
        serde_json::from_str("null")
    } else {
        serde_json::from_str(text)
    }
}

pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ===== Service Implementations =====
// Token endpoints bypass the expiry hook so a rejected renewal can't recurse
// into another renewal.

#[async_trait]
impl AuthService for ApiClient {
    async fn login(&self, identifier: &str, encoded_secret: &str) -> crate::error::Result<TokenResponse> {
        let body = serde_json::to_value(TokenRequest::password(identifier, encoded_secret.to_string()))
            .map_err(|e| crate::error::SessionError::Parse(e.to_string()))?;
        let resp = self
            .execute(Method::POST, LOGIN_PATH, Some(&body), &new_request_id(), None)
            .await?;
        Ok(resp)
    }

    async fn refresh_token(&self, refresh_token: &str) -> crate::error::Result<TokenResponse> {
        let body = serde_json::to_value(TokenRequest::refresh(refresh_token))
            .map_err(|e| crate::error::SessionError::Parse(e.to_string()))?;
        let resp = self
            .execute(Method::POST, REFRESH_TOKEN_PATH, Some(&body), &new_request_id(), None)
            .await?;
        Ok(resp)
    }

    async fn logout(&self) -> crate::error::Result<()> {
        let token = self.credentials().and_then(|p| p.access_credential());
        let _: Value = self
            .execute(
                Method::POST,
                LOGOUT_PATH,
                Some(&serde_json::json!({})),
                &new_request_id(),
                token.as_deref(),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileService for ApiClient {
    async fn current_user(&self) -> crate::error::Result<UserInfo> {
        Ok(self.get::<UserInfo>(CURRENT_USER_PATH).await?)
    }
}

#[async_trait]
impl PermissionService for ApiClient {
    async fn granted_codes(&self) -> crate::error::Result<GrantedCodes> {
        Ok(self.get::<GrantedCodes>(PERMISSION_CODES_PATH).await?)
    }
}
