//! Configuration for the sync engine.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Collection that groups this application's documents on the server.
pub const DEFAULT_COLLECTION: &str = "attendanceApp";

/// Default bound on a single remote read or write.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for the shared remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL of the document server.
    pub base_url: String,
    /// Document collection on the server.
    pub collection: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// Upper bound on each remote operation.
    pub timeout: Duration,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            collection: DEFAULT_COLLECTION.to_string(),
            token: None,
            timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Directory holding the local cache files.
    pub data_dir: PathBuf,
    /// Remote store settings. `None` runs in local-only mode.
    pub remote: Option<RemoteConfig>,
}

impl SyncConfig {
    /// Local-only configuration rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Timeout applied to remote calls.
    pub fn remote_timeout(&self) -> Duration {
        self.remote
            .as_ref()
            .map(|r| r.timeout)
            .unwrap_or(DEFAULT_REMOTE_TIMEOUT)
    }

    /// Load configuration from environment variables.
    ///
    /// - `ROLLCALL_DATA_DIR` (default `./rollcall-data`)
    /// - `ROLLCALL_REMOTE_URL` (unset or empty: local-only)
    /// - `ROLLCALL_REMOTE_COLLECTION` (default `attendanceApp`)
    /// - `ROLLCALL_REMOTE_TOKEN`
    /// - `ROLLCALL_REMOTE_TIMEOUT_MS` (default 10000, must be positive)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = lookup("ROLLCALL_DATA_DIR").unwrap_or_else(|| "rollcall-data".to_string());
        let mut config = SyncConfig::new(data_dir);

        let url = lookup("ROLLCALL_REMOTE_URL").filter(|u| !u.trim().is_empty());
        if let Some(url) = url {
            let mut remote = RemoteConfig::new(url.trim());
            if let Some(collection) = lookup("ROLLCALL_REMOTE_COLLECTION") {
                remote = remote.with_collection(collection);
            }
            if let Some(token) = lookup("ROLLCALL_REMOTE_TOKEN").filter(|t| !t.is_empty()) {
                remote = remote.with_token(token);
            }
            if let Some(ms) = lookup("ROLLCALL_REMOTE_TIMEOUT_MS") {
                let ms: u64 = match ms.parse() {
                    Ok(0) | Err(_) => return Err(ConfigError::InvalidTimeout(ms)),
                    Ok(ms) => ms,
                };
                remote = remote.with_timeout(Duration::from_millis(ms));
            }
            config.remote = Some(remote);
        }

        Ok(config)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid ROLLCALL_REMOTE_TIMEOUT_MS value: {0}")]
    InvalidTimeout(String),
}
