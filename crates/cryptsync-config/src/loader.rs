//! Configuration loader utilities

use crate::{AppConfig, ConfigBuilder, ConfigError, ConfigResult};
use std::path::{Path, PathBuf};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "CRYPTSYNC";

/// Configuration loader with common loading patterns
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the first file found in the default locations
    pub fn load_default() -> ConfigResult<AppConfig> {
        let mut builder = ConfigBuilder::new();
        if let Some(path) = Self::config_exists() {
            builder = builder.add_source_file(path);
        }
        builder.add_env_prefix(ENV_PREFIX).build()
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<AppConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Configuration file not found",
                ),
            });
        }

        ConfigBuilder::new()
            .add_source_file(path)
            .add_env_prefix(ENV_PREFIX)
            .build()
    }

    /// Load from `path` if given, else from the default locations
    pub fn load(path: Option<&Path>) -> ConfigResult<AppConfig> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load_default(),
        }
    }

    /// Save configuration to a file, format chosen by extension
    ///
    /// Passwords are written in protected form. Parent directories are created.
    pub fn save_to_file<P: AsRef<Path>>(config: &AppConfig, path: P) -> ConfigResult<()> {
        let path = path.as_ref();

        let content = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => {
                toml::to_string_pretty(config).map_err(|e| ConfigError::Serialization {
                    message: format!("Failed to serialize to TOML: {}", e),
                })?
            }
            Some("json") => {
                serde_json::to_string_pretty(config).map_err(|e| ConfigError::Serialization {
                    message: format!("Failed to serialize to JSON: {}", e),
                })?
            }
            _ => serde_yaml::to_string(config).map_err(|e| ConfigError::Serialization {
                message: format!("Failed to serialize to YAML: {}", e),
            })?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }

    /// File written by `pairs add/remove` when no `--config` is given
    ///
    /// The first existing default file, else `<config dir>/cryptsync/config.yaml`.
    pub fn default_save_path() -> PathBuf {
        Self::config_exists().unwrap_or_else(|| {
            dirs::config_dir()
                .map(|dir| dir.join("cryptsync").join("config.yaml"))
                .unwrap_or_else(|| PathBuf::from("cryptsync.yaml"))
        })
    }

    /// Default configuration file paths in order of preference
    fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("cryptsync.yaml"),
            PathBuf::from("cryptsync.yml"),
            PathBuf::from("cryptsync.toml"),
            PathBuf::from("cryptsync.json"),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            let app_dir = config_dir.join("cryptsync");
            paths.push(app_dir.join("config.yaml"));
            paths.push(app_dir.join("config.yml"));
            paths.push(app_dir.join("config.toml"));
            paths.push(app_dir.join("config.json"));
        }

        paths
    }

    /// First configuration file that exists in the default locations
    pub fn config_exists() -> Option<PathBuf> {
        Self::default_config_paths()
            .into_iter()
            .find(|path| path.exists())
    }
}
