use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::client::{HttpRemote, RemoteError, RemoteStore};
use super::remote::InProcessRemote;
use super::scheduler::Clock;
use crate::storage::{CacheBackend, CacheError, FileCache, MemoryCache};

/// Environment variable overriding the remote server URL
pub const SERVER_URL_ENV: &str = "NOTESYNC_API_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Which remote store backend to talk to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum RemoteBackend {
    /// The HTTP note API
    #[default]
    Http,
    /// An in-process store. Nothing leaves this machine.
    InProcess,
}

/// Which local cache backend to use
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum CacheKind {
    /// A JSON file on disk
    #[default]
    File,
    /// Memory only, lost on exit
    Memory,
}

/// Sync engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Remote store backend
    pub remote: RemoteBackend,
    /// Base URL of the note API (e.g. "http://localhost:3000/api")
    pub server_url: String,
    /// Local cache backend
    pub cache: CacheKind,
    /// Cache file location. Defaults to the platform data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,
    /// Quiet window before an edited note is written back, in milliseconds
    pub debounce_ms: u64,
    /// Periodic sync interval in seconds
    pub sync_interval_secs: u64,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote: RemoteBackend::Http,
            server_url: "http://localhost:3000/api".to_string(),
            cache: CacheKind::File,
            cache_path: None,
            debounce_ms: 300,
            sync_interval_secs: 30,
            request_timeout_secs: 10,
        }
    }
}

impl SyncConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&data)?)
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("notesync").join("config.toml"))
    }

    /// Apply environment overrides
    pub fn with_env(mut self) -> Self {
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            if !url.is_empty() {
                self.server_url = url;
            }
        }
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Build the configured remote store
    pub fn build_remote(&self, clock: Arc<dyn Clock>) -> Result<Arc<dyn RemoteStore>, RemoteError> {
        Ok(match self.remote {
            RemoteBackend::Http => Arc::new(HttpRemote::new(&self.server_url, self.request_timeout())?),
            RemoteBackend::InProcess => Arc::new(InProcessRemote::new(clock)),
        })
    }

    /// Build the configured local cache
    pub fn build_cache(&self) -> Result<Arc<dyn CacheBackend>, CacheError> {
        Ok(match self.cache {
            CacheKind::File => {
                let path = match &self.cache_path {
                    Some(path) => path.clone(),
                    None => FileCache::default_path()?,
                };
                Arc::new(FileCache::new(path))
            }
            CacheKind::Memory => Arc::new(MemoryCache::new()),
        })
    }
}

/// Connectivity as last observed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

/// Passive status indicator for the UI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub connectivity: Connectivity,
    /// Notes with a persist scheduled but not yet sent
    pub pending_changes: usize,
    /// Deletes not yet confirmed by the remote store
    pub pending_deletes: usize,
    /// Last successful periodic or manual sync
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Last remote failure, cleared by the next success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load(&dir.path().join("none.toml")).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.debounce(), Duration::from_millis(300));
        assert_eq!(config.sync_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "remote = \"inProcess\"\ncache = \"memory\"\ndebounceMs = 50\n",
        )
        .unwrap();
        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.remote, RemoteBackend::InProcess);
        assert_eq!(config.cache, CacheKind::Memory);
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.sync_interval_secs, 30);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "debounceMs = \"soon\"").unwrap();
        assert!(matches!(SyncConfig::load(&path), Err(ConfigError::Toml(_))));
    }
}
