//! Error types for configuration management

use cryptsync_types::Error as CryptSyncError;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error when reading or writing a configuration file
    #[error("I/O error on config file '{path}': {source}")]
    Io {
        /// Path to the configuration file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Configuration file parsing error
    #[error("Failed to parse config file '{path}': {message}")]
    Parse {
        /// Path to the configuration file
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    Validation {
        /// Validation error message
        message: String,
    },

    /// Missing required configuration
    #[error("Missing required configuration: {key}")]
    MissingRequired {
        /// Configuration key that is missing
        key: String,
    },

    /// Invalid configuration value
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    /// A stored password could not be unprotected
    #[error("Password protection error: {message}")]
    Password {
        /// Error message
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message
        message: String,
    },

    /// Generic configuration error
    #[error("Configuration error: {message}")]
    Other {
        /// Error message
        message: String,
    },
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: error.to_string(),
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization {
            message: error.to_string(),
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(error: config::ConfigError) -> Self {
        Self::Other {
            message: error.to_string(),
        }
    }
}

impl From<ConfigError> for CryptSyncError {
    fn from(error: ConfigError) -> Self {
        CryptSyncError::config(error.to_string())
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new missing required error
    pub fn missing_required<S: Into<String>>(key: S) -> Self {
        Self::MissingRequired { key: key.into() }
    }

    /// Create a new invalid value error
    pub fn invalid_value<K: Into<String>, S: Into<String>>(key: K, message: S) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a new password error
    pub fn password<S: Into<String>>(message: S) -> Self {
        Self::Password {
            message: message.into(),
        }
    }

    /// Create a new other error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptsync_types::ErrorKind;

    #[test]
    fn test_converts_into_core_config_error() {
        let error: CryptSyncError = ConfigError::validation("paths overlap").into();
        assert_eq!(error.kind(), ErrorKind::Config);
        assert!(error.to_string().contains("paths overlap"));
    }

    #[test]
    fn test_invalid_value_message() {
        let error = ConfigError::invalid_value("password", "contains a double quote");
        assert_eq!(
            error.to_string(),
            "Invalid value for 'password': contains a double quote"
        );
    }
}
