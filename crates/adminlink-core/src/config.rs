//! Client configuration management.
//!
//! Holds the backend origin, the persisted-key namespace, cache and transport
//! tuning, and where persistent state lives.
//!
//! Configuration is stored at `~/.config/adminlink/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application name used for config/storage directory paths
const APP_NAME: &str = "adminlink";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default cache entry lifetime (two minutes).
pub const DEFAULT_CACHE_TTL_MS: u64 = 2 * 60 * 1000;

/// Default transport timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default number of retries for rate-limited (429) requests.
pub const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Default prefix for every persisted key.
pub const DEFAULT_NAMESPACE: &str = "adminlink.";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not find {0} directory")]
    NoDirectory(&'static str),

    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub namespace: String,
    pub default_cache_ttl_ms: u64,
    pub request_timeout_secs: u64,
    pub max_rate_limit_retries: u32,
    pub storage_dir: Option<PathBuf>,
    /// Keep auth tokens in the OS keychain instead of the storage directory.
    pub use_keyring: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            default_cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            storage_dir: None,
            use_keyring: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoDirectory("config"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for persisted tokens, session snapshot and cache entries.
    pub fn storage_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(ref dir) = self.storage_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir().ok_or(ConfigError::NoDirectory("cache"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn default_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.default_cache_ttl_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Service name used for keychain entries.
    pub fn keyring_service(&self) -> &'static str {
        APP_NAME
    }
}
