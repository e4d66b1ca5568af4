//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (GENOLITH_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [query]
//! worker_threads = 8
//! batch_size = 4096
//! timeout_secs = 60
//!
//! [snapshot]
//! directory = "/var/lib/genolith/data"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! GENOLITH_QUERY__WORKER_THREADS=16
//! GENOLITH_SNAPSHOT__DIRECTORY=/custom/path
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Query execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Number of worker threads for parallel partition evaluation
    /// 0 = use all available CPU cores
    #[serde(default)]
    pub worker_threads: usize,

    /// Row-id batch size for the action producers
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Query deadline in seconds (0 = no deadline)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Bounded channel capacity (in batches) between producers and the
    /// output sink
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Build-phase configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Maximum rows per partition when no partition key is declared
    #[serde(default = "default_partition_capacity")]
    pub partition_capacity: u32,

    /// Integer columns keep an equi-index while their distinct-value count
    /// stays at or below this cap
    #[serde(default = "default_equi_index_cardinality")]
    pub equi_index_max_cardinality: usize,
}

/// Snapshot storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Directory holding the persisted database
    #[serde(default = "default_snapshot_directory")]
    pub directory: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_batch_size() -> usize {
    4096
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_channel_capacity() -> usize {
    4
}
fn default_partition_capacity() -> u32 {
    65_536
}
fn default_equi_index_cardinality() -> usize {
    1024
}
fn default_snapshot_directory() -> PathBuf {
    PathBuf::from("./data")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. config.toml (base configuration)
    /// 2. config.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (GENOLITH_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("GENOLITH_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("GENOLITH_").split("__"))
            .extract()
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            worker_threads: 0,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            partition_capacity: default_partition_capacity(),
            equi_index_max_cardinality: default_equi_index_cardinality(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            directory: default_snapshot_directory(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.query.worker_threads, 0);
        assert_eq!(config.query.batch_size, 4096);
        assert_eq!(config.build.partition_capacity, 65_536);
        assert_eq!(config.snapshot.directory, PathBuf::from("./data"));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).expect("serializable");

        assert!(toml_str.contains("[query]"));
        assert!(toml_str.contains("[snapshot]"));
        assert!(toml_str.contains("[logging]"));
    }
}
