//! Connector configuration
//!
//! Stored as JSON. Every field has a default, so a config file only needs
//! to name what it changes:
//!
//! ```json
//! {
//!   "properties": { "bootstrap.servers": "localhost:9092" },
//!   "use_cache": true
//! }
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Largest payload published as a single data record
pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;

/// Smallest chunk size that can always avoid one-byte tail blobs
pub const MIN_CHUNK_SIZE: usize = 3;

/// How long one read poll waits for a record
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 3_000;

/// How many polls a read makes before giving up
pub const DEFAULT_POLL_ATTEMPTS: u32 = 3;

/// Consecutive empty polls tolerated while rebuilding an index
pub const DEFAULT_SCAN_IDLE_POLL_LIMIT: u32 = 10;

/// Configuration for a [`Connector`](crate::Connector)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Broker connection properties (e.g. `bootstrap.servers`)
    pub properties: BTreeMap<String, String>,
    /// Memoize file existence and size lookups
    pub use_cache: bool,
    /// Maximum bytes per data record
    pub chunk_size: usize,
    /// Per-poll wait when reading a blob
    pub poll_timeout_ms: u64,
    /// Polls per blob read before reporting no data
    pub poll_attempts: u32,
    /// Empty polls tolerated during an index rebuild
    pub scan_idle_poll_limit: u32,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        ConnectorConfig {
            properties: BTreeMap::new(),
            use_cache: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            scan_idle_poll_limit: DEFAULT_SCAN_IDLE_POLL_LIMIT,
        }
    }
}

impl ConnectorConfig {
    /// Default configuration with the metadata cache enabled
    pub fn caching() -> Self {
        ConnectorConfig {
            use_cache: true,
            ..Self::default()
        }
    }

    /// Set a broker property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Parse from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ConnectorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file, falling back to defaults when it doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Save as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that would stall or break the connector
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(Error::Config(format!(
                "chunk_size must be at least {}",
                MIN_CHUNK_SIZE
            )));
        }
        if self.poll_attempts == 0 {
            return Err(Error::Config("poll_attempts must be positive".into()));
        }
        if self.scan_idle_poll_limit == 0 {
            return Err(Error::Config("scan_idle_poll_limit must be positive".into()));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Settings used when replaying an index log
    pub(crate) fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            poll_timeout: self.poll_timeout(),
            idle_poll_limit: self.scan_idle_poll_limit,
        }
    }
}

/// Poll behavior of an index rebuild
#[derive(Clone, Copy, Debug)]
pub(crate) struct ScanSettings {
    pub poll_timeout: Duration,
    pub idle_poll_limit: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = ConnectorConfig::default();
        assert!(!config.use_cache);
        assert_eq!(config.chunk_size, 1_000_000);
        assert_eq!(config.poll_timeout(), Duration::from_secs(3));
        assert_eq!(config.poll_attempts, 3);
        assert!(ConnectorConfig::caching().use_cache);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ConnectorConfig::from_json(
            r#"{ "use_cache": true, "properties": { "num.partitions": "3" } }"#,
        )
        .unwrap();
        assert!(config.use_cache);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.properties.get("num.partitions").unwrap(), "3");
    }

    #[test]
    fn test_rejects_tiny_chunk_size() {
        let result = ConnectorConfig::from_json(r#"{ "chunk_size": 0 }"#);
        assert!(matches!(result, Err(Error::Config(_))));
        let result = ConnectorConfig::from_json(r#"{ "chunk_size": 2 }"#);
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(ConnectorConfig::from_json(r#"{ "chunk_size": 3 }"#).is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logfs.json");

        let config = ConnectorConfig::caching()
            .with_property("bootstrap.servers", "localhost:9092");
        config.save(&path).unwrap();

        let loaded = ConnectorConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let loaded = ConnectorConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, ConnectorConfig::default());
    }
}
