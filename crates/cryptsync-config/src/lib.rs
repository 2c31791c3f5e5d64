//! Configuration management for CryptSync
//!
//! This crate holds the persisted application settings: the ordered list of
//! sync pairs, the global ignore list, background timing and logging. Settings
//! are layered from defaults, a YAML/TOML/JSON file and `CRYPTSYNC__*`
//! environment variables, and every pair is validated on load.
//!
//! # Examples
//!
//! ```rust
//! use cryptsync_config::{AppConfig, SyncPair};
//!
//! let mut config = AppConfig::default();
//! config.add_pair(SyncPair::new("/data/plain", "/data/crypt", "secret")).unwrap();
//! assert_eq!(config.pairs.len(), 1);
//! assert!(config.add_pair(SyncPair::new("/data/plain", "/data/other", "x")).is_err());
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod builder;
pub mod error;
pub mod loader;
pub mod pair;
pub mod password;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use pair::{normalize_root, PairFilters, SyncPair, DEFAULT_COMPRESS_SIZE_LIMIT_MB};
pub use password::ProtectedPassword;

/// Global ignore list applied to every pair
pub const DEFAULT_IGNORE_PATTERNS: &str = "*.tmp*|~*.*|thumbs.db|desktop.ini";

/// Main configuration structure for CryptSync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configured pairs, processed in order
    #[serde(default)]
    pub pairs: Vec<SyncPair>,
    /// `|`-separated wildcard patterns ignored on both sides of every pair
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: String,
    /// Seconds between full background passes in watch mode
    #[serde(default = "default_full_scan_interval_secs")]
    pub full_scan_interval_secs: u64,
    /// Milliseconds between change-notification drains in watch mode
    #[serde(default = "default_notify_drain_interval_ms")]
    pub notify_drain_interval_ms: u64,
    /// External GPG executable
    #[serde(default = "default_gpg_program")]
    pub gpg_program: PathBuf,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pairs: Vec::new(),
            ignore_patterns: default_ignore_patterns(),
            full_scan_interval_secs: default_full_scan_interval_secs(),
            notify_drain_interval_ms: default_notify_drain_interval_ms(),
            gpg_program: default_gpg_program(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Validate every pair and the logging section
    pub fn validate(&self) -> ConfigResult<()> {
        for (index, pair) in self.pairs.iter().enumerate() {
            pair.validate().map_err(|e| {
                ConfigError::validation(format!("pair {} ({}): {}", index, pair.original_path.display(), e))
            })?;
        }

        if self.full_scan_interval_secs == 0 {
            return Err(ConfigError::validation(
                "full_scan_interval_secs must be greater than 0",
            ));
        }
        if self.notify_drain_interval_ms == 0 {
            return Err(ConfigError::validation(
                "notify_drain_interval_ms must be greater than 0",
            ));
        }

        self.logging.validate()
    }

    /// Validate and append a pair
    ///
    /// A pair whose original folder is already configured is rejected.
    pub fn add_pair(&mut self, mut pair: SyncPair) -> ConfigResult<()> {
        pair.normalize();
        pair.validate()?;
        if self.find_pair(&pair.original_path).is_some() {
            return Err(ConfigError::validation(format!(
                "a pair for {} already exists",
                pair.original_path.display()
            )));
        }
        self.pairs.push(pair);
        Ok(())
    }

    /// Remove the pair with the given original folder
    pub fn remove_pair(&mut self, original_path: &Path) -> Option<SyncPair> {
        let index = self.find_pair(original_path)?;
        Some(self.pairs.remove(index))
    }

    /// Index of the pair with the given original folder
    pub fn find_pair(&self, original_path: &Path) -> Option<usize> {
        let wanted = normalize_root(original_path);
        self.pairs.iter().position(|pair| {
            let root = normalize_root(&pair.original_path);
            cryptsync_types::path_is_within(&root, &wanted)
                && cryptsync_types::path_is_within(&wanted, &root)
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Rolling log file, none for console only
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Lines kept in the rolling log file
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    /// Longest time buffered log lines wait before being written
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_file: None,
            max_lines: default_max_lines(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !["trace", "debug", "info", "warn", "error"].contains(&self.level.as_str()) {
            return Err(ConfigError::validation(
                "Log level must be one of: trace, debug, info, warn, error",
            ));
        }
        if self.max_lines == 0 {
            return Err(ConfigError::validation("max_lines must be greater than 0"));
        }
        Ok(())
    }
}

fn default_ignore_patterns() -> String {
    DEFAULT_IGNORE_PATTERNS.to_string()
}

fn default_full_scan_interval_secs() -> u64 {
    3600
}

fn default_notify_drain_interval_ms() -> u64 {
    2000
}

fn default_gpg_program() -> PathBuf {
    PathBuf::from("gpg")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_lines() -> usize {
    10_000
}

fn default_flush_interval_secs() -> u64 {
    60
}
