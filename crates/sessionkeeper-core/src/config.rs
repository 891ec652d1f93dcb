//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the API
//! endpoint, the shared login-encoding secret, the locale sent with every
//! request, and how session expiry is presented to the user.
//!
//! Configuration is stored at `~/.config/sessionkeeper/config.json`. The
//! shared secret may instead come from `SESSIONKEEPER_AES_KEY`, which wins
//! over the file so the secret never needs to be written to disk.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "sessionkeeper";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable carrying the login-encoding shared secret
pub const SHARED_SECRET_ENV: &str = "SESSIONKEEPER_AES_KEY";

/// Environment variable overriding the API base URL
pub const API_BASE_URL_ENV: &str = "SESSIONKEEPER_API_URL";

/// How an unrecoverable session expiry is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoginExpiredMode {
    /// Tear down and redirect to the login view.
    #[default]
    Page,
    /// Keep the current view and raise an in-place re-login prompt.
    Modal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_secret: Option<String>,
    pub locale: String,
    pub login_expired_mode: LoginExpiredMode,
    pub enable_refresh_token: bool,
    pub login_path: String,
    pub default_home_path: String,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:7788".to_string(),
            shared_secret: None,
            locale: "en-US".to_string(),
            login_expired_mode: LoginExpiredMode::Page,
            enable_refresh_token: true,
            login_path: "/auth/login".to_string(),
            default_home_path: "/dashboard".to_string(),
            last_username: None,
        }
    }
}

impl Config {
    /// Load from disk, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_env(&mut self) {
        if let Some(secret) = std::env::var(SHARED_SECRET_ENV).ok().filter(|s| !s.is_empty()) {
            self.shared_secret = Some(secret);
        }
        if let Some(url) = std::env::var(API_BASE_URL_ENV).ok().filter(|s| !s.is_empty()) {
            self.api_base_url = url;
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
