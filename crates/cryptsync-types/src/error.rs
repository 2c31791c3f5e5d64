//! Error types and handling for CryptSync
//!
//! This module provides the error taxonomy shared by every CryptSync crate.
//! Per-file errors are converted into failure records by the engine; only
//! root-level errors abort the pass for a pair.

use crate::types::SyncErrorFlags;
use std::path::PathBuf;

/// Error severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorSeverity {
    /// Low severity - operation can continue
    Low,
    /// Medium severity - the file is skipped, the pass continues
    Medium,
    /// High severity - the pair is skipped for this pass
    High,
    /// Critical severity - entire process should be terminated
    Critical,
}

/// Main error type for CryptSync operations
#[derive(thiserror::Error, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {message}")]
    Io {
        /// Error message from the I/O operation
        message: String,
    },

    /// A configured root could not be read
    #[error("Access denied: {path}: {message}")]
    Access {
        /// Root or directory that could not be accessed
        path: PathBuf,
        /// Underlying cause
        message: String,
    },

    /// The content codec or external tool failed for one file
    #[error("Crypto error for '{path}': {message}")]
    Crypto {
        /// File being encrypted or decrypted
        path: PathBuf,
        /// Error message describing the codec failure
        message: String,
    },

    /// A verbatim copy failed
    #[error("Copy failed for '{path}': {message}")]
    Copy {
        /// File being copied
        path: PathBuf,
        /// Underlying cause
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Filename codec error
    #[error("Name codec error: {message}")]
    NameCodec {
        /// Error message describing the decoding issue
        message: String,
    },

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error with custom message
    #[error("{message}")]
    Other {
        /// Custom error message
        message: String,
    },
}

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// I/O related errors
    Io,
    /// Root access errors
    Access,
    /// Codec errors
    Crypto,
    /// Copy errors
    Copy,
    /// Configuration errors
    Config,
    /// Filename codec errors
    NameCodec,
    /// Cancellation
    Cancelled,
    /// Other errors
    Other,
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::Access { .. } => ErrorKind::Access,
            Self::Crypto { .. } => ErrorKind::Crypto,
            Self::Copy { .. } => ErrorKind::Copy,
            Self::Config { .. } => ErrorKind::Config,
            Self::NameCodec { .. } => ErrorKind::NameCodec,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Io { .. } => ErrorSeverity::Medium,
            Self::Access { .. } => ErrorSeverity::High,
            Self::Crypto { .. } | Self::Copy { .. } => ErrorSeverity::Medium,
            Self::Config { .. } => ErrorSeverity::High,
            Self::NameCodec { .. } => ErrorSeverity::Low,
            Self::Cancelled => ErrorSeverity::Low,
            Self::Other { .. } => ErrorSeverity::Medium,
        }
    }

    /// Check if this error is recoverable by retrying on a later pass
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { message } => {
                message.contains("Interrupted")
                    || message.contains("WouldBlock")
                    || message.contains("TimedOut")
            }
            Self::Access { .. } | Self::Crypto { .. } | Self::Copy { .. } => true,
            Self::Config { .. } | Self::Cancelled => false,
            Self::NameCodec { .. } | Self::Other { .. } => true,
        }
    }

    /// Map the error to its bit in the process exit code
    pub fn flag(&self) -> SyncErrorFlags {
        match self {
            Self::Cancelled => SyncErrorFlags::CANCELLED,
            Self::Access { .. } => SyncErrorFlags::ACCESS_DENIED,
            Self::Crypto { .. } => SyncErrorFlags::CRYPTO_ERROR,
            Self::Copy { .. } => SyncErrorFlags::COPY_ERROR,
            Self::Io { .. } | Self::Config { .. } | Self::NameCodec { .. } | Self::Other { .. } => {
                SyncErrorFlags::empty()
            }
        }
    }

    /// Create a new access error
    pub fn access<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Access {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new crypto error
    pub fn crypto<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Crypto {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new copy error
    pub fn copy<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Copy {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new name codec error
    pub fn name_codec<S: Into<String>>(message: S) -> Self {
        Self::NameCodec {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: error.to_string(),
        }
    }
}
