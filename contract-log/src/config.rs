//! Configuration for the contract log node

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// NATS server URL for the subscription channel
    pub nats_url: String,

    /// Subject prefix; each contract room is `<prefix>.<contractId>`
    pub subject_prefix: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Settings persistence configuration
    pub settings: SettingsConfig,

    /// Engine actor configuration
    pub engine: EngineConfig,

    /// Channel configuration
    pub channel: ChannelConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/contracts"),
            service_name: "contract-log".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            nats_url: "nats://localhost:4222".to_string(),
            subject_prefix: "contracts".to_string(),
            rocksdb: RocksDBConfig::default(),
            settings: SettingsConfig::default(),
            engine: EngineConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 2,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Settings persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Quiescence window before a debounced save fires (milliseconds)
    pub debounce_ms: u64,

    /// Extra attempts for a failed debounced save
    pub max_save_retries: u32,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            max_save_retries: 3,
        }
    }
}

impl SettingsConfig {
    /// Debounce window as a duration
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Engine actor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounded mailbox capacity
    pub mailbox_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1000,
        }
    }
}

/// Channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// How long `close` waits for in-flight sends to drain (milliseconds)
    pub close_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            close_timeout_ms: 500,
        }
    }
}

impl ChannelConfig {
    /// Close timeout as a duration
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    ///
    /// `CONTRACT_LOG_CONFIG` names a TOML file used as the base; the other
    /// variables override individual fields.
    pub fn from_env() -> crate::Result<Self> {
        let mut config = match std::env::var("CONTRACT_LOG_CONFIG") {
            Ok(path) => Config::from_file(path)?,
            Err(_) => Config::default(),
        };

        if let Ok(data_dir) = std::env::var("CONTRACT_LOG_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(url) = std::env::var("CONTRACT_LOG_NATS_URL") {
            config.nats_url = url;
        }

        if let Ok(ms) = std::env::var("CONTRACT_LOG_DEBOUNCE_MS") {
            config.settings.debounce_ms = ms.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid CONTRACT_LOG_DEBOUNCE_MS {:?}: {}", ms, e))
            })?;
        }

        Ok(config)
    }
}
