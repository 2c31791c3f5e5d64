//! Result type alias for CryptSync operations

use crate::Error;

/// Result type alias for CryptSync operations
pub type Result<T> = std::result::Result<T, Error>;
