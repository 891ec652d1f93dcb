use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use keyring::Entry;

use super::SessionData;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Keychain service name for the keyring-backed store
const SERVICE_NAME: &str = "sessionkeeper";

/// Keychain account for the session entry. One session per service, so the
/// entry must not depend on who last signed in.
pub const DEFAULT_ACCOUNT: &str = "session";

/// Durable storage for the persisted half of a session.
///
/// Read once at startup and written after every mutation.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<SessionData>>;
    fn save(&self, data: &SessionData) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// JSON file in the cache directory.
pub struct FileSessionStore {
    cache_dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<SessionData>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let data: SessionData =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(Some(data))
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        if data.is_empty() {
            return self.clear();
        }
        let path = self.session_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(data)?;
        std::fs::write(path, contents).context("Failed to write session file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

/// Single OS keychain entry holding the session as JSON.
pub struct KeyringSessionStore {
    account: String,
}

impl KeyringSessionStore {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.account).context("Failed to create keyring entry")
    }
}

impl Default for KeyringSessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_ACCOUNT)
    }
}

impl SessionStore for KeyringSessionStore {
    fn load(&self) -> Result<Option<SessionData>> {
        match self.entry()?.get_password() {
            Ok(json) => {
                let data = serde_json::from_str(&json)
                    .context("Failed to parse session from keychain")?;
                Ok(Some(data))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read session from keychain"),
        }
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        if data.is_empty() {
            return self.clear();
        }
        let json = serde_json::to_string(data)?;
        self.entry()?
            .set_password(&json)
            .context("Failed to store session in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }
}

/// In-process store for tests and embedders that don't persist.
#[derive(Default)]
pub struct MemorySessionStore {
    data: Mutex<Option<SessionData>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: SessionData) -> Self {
        Self {
            data: Mutex::new(Some(data)),
        }
    }

    /// What the last write left behind.
    pub fn snapshot(&self) -> Option<SessionData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<SessionData>> {
        Ok(self.snapshot())
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        let mut slot = self.data.lock().unwrap_or_else(|e| e.into_inner());
        *slot = (!data.is_empty()).then(|| data.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.data.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
