//! Storage backend configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Configuration for the SQLite backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file. None opens a private in-memory database.
    pub path: Option<PathBuf>,

    /// How long a statement waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5_000,
        }
    }
}

impl SqliteConfig {
    /// Configuration for a database file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Configuration for an in-memory database.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Set the busy timeout.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// The busy timeout as a duration.
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Configuration for the sled backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SledConfig {
    /// Path to the database directory.
    pub path: PathBuf,

    /// Page cache capacity in bytes.
    pub cache_capacity: u64,

    /// Flush interval in milliseconds. None means flush on every write.
    pub flush_every_ms: Option<u64>,

    /// Enable zstd compression.
    pub compression: bool,

    /// Temporary database (deleted on drop).
    pub temporary: bool,
}

impl Default for SledConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./ormkit_data"),
            cache_capacity: 64 * 1024 * 1024, // 64MB
            flush_every_ms: Some(1000),
            compression: true,
            temporary: false,
        }
    }
}

impl SledConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a temporary in-memory configuration for testing.
    pub fn temporary() -> Self {
        Self {
            path: PathBuf::from(""),
            temporary: true,
            ..Default::default()
        }
    }

    /// Set the page cache capacity.
    pub fn with_cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    /// Set the flush interval. None flushes on every write.
    pub fn with_flush_every_ms(mut self, ms: Option<u64>) -> Self {
        self.flush_every_ms = ms;
        self
    }

    /// Enable or disable compression.
    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    /// Convert to sled configuration.
    pub fn to_sled_config(&self) -> sled::Config {
        let mut config = sled::Config::new()
            .cache_capacity(self.cache_capacity)
            .use_compression(self.compression)
            .flush_every_ms(self.flush_every_ms);

        if self.temporary {
            config = config.temporary(true);
        } else {
            config = config.path(&self.path);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_config() {
        let config = SqliteConfig::new("/tmp/app.db").with_busy_timeout(Duration::from_secs(2));
        assert_eq!(config.path, Some(PathBuf::from("/tmp/app.db")));
        assert_eq!(config.busy_timeout(), Duration::from_secs(2));
        assert!(SqliteConfig::in_memory().path.is_none());
    }

    #[test]
    fn test_sled_config() {
        let config = SledConfig::new("/tmp/ormkit")
            .with_cache_capacity(1024)
            .with_flush_every_ms(None)
            .with_compression(false);
        assert_eq!(config.cache_capacity, 1024);
        assert_eq!(config.flush_every_ms, None);
        assert!(!config.compression);
        assert!(!config.temporary);
        assert!(SledConfig::temporary().temporary);
    }

    #[test]
    fn test_deserialize() {
        let config: SledConfig =
            serde_json::from_str(r#"{"path": "/data", "compression": false}"#).unwrap();
        assert_eq!(config.path, PathBuf::from("/data"));
        assert!(!config.compression);
        assert_eq!(config.flush_every_ms, Some(1000));

        let config: SqliteConfig = serde_json::from_str(r#"{"busy_timeout_ms": 10}"#).unwrap();
        assert!(config.path.is_none());
        assert_eq!(config.busy_timeout_ms, 10);
    }
}
