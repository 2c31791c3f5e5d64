//! Layered configuration loading
//!
//! Sources are applied in order: built-in defaults, configuration files,
//! then environment variables (`CRYPTSYNC__LOGGING__LEVEL=debug`).

use crate::{AppConfig, ConfigError, ConfigResult};
use config::{ConfigBuilder as ConfigBuilderInner, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

/// Configuration builder for loading configuration from multiple sources
#[derive(Debug)]
pub struct ConfigBuilder {
    inner: ConfigBuilderInner<config::builder::DefaultState>,
    sources: Vec<ConfigSource>,
    env_separator: String,
}

#[derive(Debug, Clone)]
enum ConfigSource {
    File { path: PathBuf, format: FileFormat },
    Environment { prefix: String },
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            inner: config::Config::builder(),
            sources: Vec::new(),
            env_separator: "__".to_string(),
        }
    }

    /// Add a configuration file source; missing files are skipped
    pub fn add_source_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let format = Self::detect_format(&path);
        self.sources.push(ConfigSource::File { path, format });
        self
    }

    /// Add environment variable source with prefix
    pub fn add_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.sources.push(ConfigSource::Environment {
            prefix: prefix.into(),
        });
        self
    }

    /// Set environment variable separator (default: "__")
    pub fn env_separator<S: Into<String>>(mut self, separator: S) -> Self {
        self.env_separator = separator.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(mut self) -> ConfigResult<AppConfig> {
        let defaults = serde_yaml::to_value(AppConfig::default())
            .map_err(|e| ConfigError::other(format!("Failed to serialize defaults: {}", e)))?;
        self.inner = self
            .inner
            .add_source(config::Config::try_from(&defaults)?);

        for source in &self.sources {
            match source {
                ConfigSource::File { path, format } => {
                    if path.exists() {
                        self.inner = self
                            .inner
                            .add_source(File::from(path.clone()).format(*format));
                    }
                }
                ConfigSource::Environment { prefix } => {
                    self.inner = self.inner.add_source(
                        Environment::with_prefix(prefix)
                            .prefix_separator(&self.env_separator)
                            .separator(&self.env_separator),
                    );
                }
            }
        }

        let merged = self.inner.build()?;
        let mut result: AppConfig = merged.try_deserialize()?;
        for pair in &mut result.pairs {
            pair.normalize();
        }
        result.validate()?;

        Ok(result)
    }

    /// Try to build the configuration, returning defaults on error
    pub fn build_or_default(self) -> AppConfig {
        self.build().unwrap_or_default()
    }

    fn detect_format(path: &Path) -> FileFormat {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Yaml,
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptsync_types::SyncDirection;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builder_defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_builder_yaml_file() {
        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(
            temp_file,
            r#"
ignore_patterns: "*.bak"
logging:
  level: debug
pairs:
  - original_path: /data/plain/
    encrypted_path: /data/crypt
    password: plain-secret
    sync_direction: src_to_dst
    encrypt_names: true
"#
        )
        .unwrap();

        let config = ConfigBuilder::new()
            .add_source_file(temp_file.path())
            .build()
            .unwrap();

        assert_eq!(config.ignore_patterns, "*.bak");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.pairs.len(), 1);
        let pair = &config.pairs[0];
        assert_eq!(pair.original_path, PathBuf::from("/data/plain"));
        assert_eq!(pair.password.expose(), "plain-secret");
        assert_eq!(pair.sync_direction, SyncDirection::SrcToDst);
        assert!(pair.encrypt_names);
        assert!(pair.enabled);
        assert!(pair.use_archive_format);
    }

    #[test]
    fn test_builder_rejects_nested_pair() {
        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(
            temp_file,
            r#"
pairs:
  - original_path: /data
    encrypted_path: /data/crypt
"#
        )
        .unwrap();

        let result = ConfigBuilder::new()
            .add_source_file(temp_file.path())
            .build();

        assert!(result.unwrap_err().to_string().contains("nested"));
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let config = ConfigBuilder::new()
            .add_source_file("/nonexistent/cryptsync.yaml")
            .build()
            .unwrap();
        assert!(config.pairs.is_empty());
    }
}
