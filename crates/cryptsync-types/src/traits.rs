//! Core traits for CryptSync operations
//!
//! This module defines the narrow interface the engine uses to reach the
//! content codecs (archive container, external GPG process) and the
//! cooperative cancellation primitive shared by the coordinator and codecs.

use crate::Result;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Whether the codec should compress before encrypting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    /// Compress, then encrypt
    Compress,
    /// Encrypt only (store)
    Store,
}

impl CompressionMode {
    /// Check if compression is enabled
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::Compress)
    }
}

/// Progress snapshot passed to codec callbacks
#[derive(Debug, Clone, Copy)]
pub struct CodecProgress<'a> {
    /// Bytes processed so far
    pub processed: u64,
    /// Total bytes to process, 0 when unknown
    pub total: u64,
    /// Item being processed
    pub current_item: &'a Path,
}

/// Answer returned by a progress callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressAction {
    /// Keep going
    Continue,
    /// Stop as soon as possible and fail with `Error::Cancelled`
    Abort,
}

/// Encrypt/decrypt service for file contents
///
/// Implementations write to exactly the path they are given; the engine
/// chooses temporary paths and performs the final atomic rename.
pub trait ContentCodec: Send + Sync + fmt::Debug {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Encrypt `source` into `archive`
    fn encrypt(
        &self,
        source: &Path,
        archive: &Path,
        password: &str,
        mode: CompressionMode,
        progress: &dyn Fn(&CodecProgress<'_>) -> ProgressAction,
    ) -> Result<()>;

    /// Decrypt `archive` into the file `destination`
    fn decrypt(
        &self,
        archive: &Path,
        destination: &Path,
        password: &str,
        progress: &dyn Fn(&CodecProgress<'_>) -> ProgressAction,
    ) -> Result<()>;

    /// Whether `file` exists and was certainly not written by this codec
    ///
    /// Used to tell the user's own archives apart from containers whose
    /// name carries no extension. Codecs that cannot tell answer `false`.
    fn is_foreign(&self, _file: &Path) -> bool {
        false
    }
}

/// Trait for operation cancellation
pub trait Cancellable {
    /// Cancel the operation
    fn cancel(&self);

    /// Check if the operation is cancelled
    fn is_cancelled(&self) -> bool;
}

/// Shared cancellation flag
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the flag before a new run
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Fail with `Error::Cancelled` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(crate::Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Progress answer matching the current state
    pub fn progress_action(&self) -> ProgressAction {
        if self.is_cancelled() {
            ProgressAction::Abort
        } else {
            ProgressAction::Continue
        }
    }
}

impl Cancellable for CancelToken {
    fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
