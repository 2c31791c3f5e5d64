//! Core type system and error handling for CryptSync
//!
//! This crate provides the foundational types, error handling, and shared data structures
//! used throughout the CryptSync workspace. It includes:
//!
//! - **Error handling**: Error taxonomy with kinds, severity levels and exit-code flags
//! - **Core types**: Sync directions, per-file metadata snapshots and case-insensitive keys
//! - **Time comparison**: Timestamp ordering with optional FAT tolerance
//! - **Traits**: The narrow content-codec interface and cancellation
//!
//! # Features
//!
//! - `std` (default): Enable standard library features
//! - `serde`: Enable serialization support
//!
//! # Examples
//!
//! ```rust
//! use cryptsync_types::{compare_time, SyncErrorFlags};
//! use filetime::FileTime;
//! use std::cmp::Ordering;
//!
//! let a = FileTime::from_unix_time(1_700_000_000, 0);
//! let b = FileTime::from_unix_time(1_700_000_001, 0);
//! assert_eq!(compare_time(a, b, false), Ordering::Less);
//! assert_eq!(compare_time(a, b, true), Ordering::Equal);
//!
//! let flags = SyncErrorFlags::CRYPTO_ERROR | SyncErrorFlags::COPY_ERROR;
//! assert_eq!(flags.bits(), 12);
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod result;
pub mod retry;
pub mod time;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::{Error, ErrorKind, ErrorSeverity};
pub use result::Result;
pub use retry::{RetryPolicy, TIMESTAMP_RETRY_ATTEMPTS, TIMESTAMP_RETRY_DELAY};
pub use time::{compare_time, round_up_to_fat, FAT_GRANULARITY_NANOS, FAT_TOLERANCE_NANOS};
pub use traits::*;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_stats_merge() {
        let mut stats1 = SyncStats::new();
        stats1.encrypted = 5;
        stats1.skipped = 2;

        let mut stats2 = SyncStats::new();
        stats2.encrypted = 3;
        stats2.deleted = 1;

        stats1.merge(&stats2);
        assert_eq!(stats1.encrypted, 8);
        assert_eq!(stats1.deleted, 1);
        assert_eq!(stats1.actions(), 9);
    }

    #[test]
    fn test_error_flag_mapping() {
        assert_eq!(Error::Cancelled.flag(), SyncErrorFlags::CANCELLED);
        assert_eq!(
            Error::crypto("a.txt", "bad password").flag(),
            SyncErrorFlags::CRYPTO_ERROR
        );
        assert_eq!(Error::config("nested").flag(), SyncErrorFlags::empty());
    }
}
