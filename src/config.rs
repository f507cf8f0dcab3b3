//! Configuration for sheetdir

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sheetdir")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for the system database and per-directory databases
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Maximum pooled connections per database file
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// SQLite busy timeout in milliseconds
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// TTL for cached admin/owner checks
    #[serde(default = "default_cache_ttl")]
    pub permission_cache_ttl_secs: u64,

    #[serde(default)]
    pub limits: WriteLimits,

    #[serde(default)]
    pub sheet_sync: SheetSyncConfig,
}

/// Validation limits applied to user-submitted row writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteLimits {
    #[serde(default = "default_max_columns")]
    pub max_columns: usize,

    #[serde(default = "default_max_cell_length")]
    pub max_cell_length: usize,
}

/// Spreadsheet write-back settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetSyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Attempts per write-back before it is logged and dropped
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_pool_size() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_max_columns() -> usize {
    50
}

fn default_max_cell_length() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2_000
}

impl Default for WriteLimits {
    fn default() -> Self {
        Self {
            max_columns: default_max_columns(),
            max_cell_length: default_max_cell_length(),
        }
    }
}

impl Default for SheetSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl SheetSyncConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            permission_cache_ttl_secs: default_cache_ttl(),
            limits: WriteLimits::default(),
            sheet_sync: SheetSyncConfig::default(),
        }
    }
}

impl Config {
    /// Default configuration rooted at a specific storage directory
    pub fn with_storage_dir(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Self::default()
        }
    }

    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Path of the system database
    pub fn system_db_path(&self) -> PathBuf {
        self.storage_dir.join("system.db")
    }

    /// Directory holding one database per mirrored directory
    pub fn directories_dir(&self) -> PathBuf {
        self.storage_dir.join("directories")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn permission_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.permission_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.permission_cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.limits.max_columns, 50);
        assert_eq!(config.limits.max_cell_length, 1000);
        assert_eq!(config.sheet_sync.max_attempts, 3);
        assert!(config.sheet_sync.enabled);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            storage_dir = "/tmp/sheetdir-test"
            permission_cache_ttl_secs = 10

            [limits]
            max_columns = 12
            "#,
        )
        .unwrap();

        assert_eq!(config.storage_dir, PathBuf::from("/tmp/sheetdir-test"));
        assert_eq!(config.permission_cache_ttl_secs, 10);
        assert_eq!(config.limits.max_columns, 12);
        assert_eq!(config.limits.max_cell_length, 1000);
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.system_db_path(), PathBuf::from("/tmp/sheetdir-test/system.db"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::with_storage_dir(dir.path());
        config.sheet_sync.max_attempts = 5;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.storage_dir, dir.path());
        assert_eq!(loaded.sheet_sync.max_attempts, 5);
    }
}
