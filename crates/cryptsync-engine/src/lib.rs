//! Synchronization engine for CryptSync
//!
//! This crate keeps an original folder and its encrypted mirror consistent.
//! Modification time is the only ordering signal.
//!
//! # Features
//!
//! - **Enumeration**: both folders are listed and joined by plaintext path
//! - **Decisions**: a pure decision table per path, with filters applied first
//! - **Safe writes**: temp file and rename, timestamps forced afterwards
//! - **Coordinator**: one worker thread, interactive passes preempt background ones
//! - **Change notifications**: single changed paths are synced without a full scan
//!
//! # Examples
//!
//! ```rust,no_run
//! use cryptsync_config::SyncPair;
//! use cryptsync_engine::{SyncContext, SyncCoordinator};
//! use std::sync::Arc;
//!
//! # fn example() -> cryptsync_types::Result<()> {
//! let pair = SyncPair::new("/home/me/Documents", "/mnt/cloud/Documents", "secret");
//! let context = Arc::new(SyncContext::new(vec![pair], "*.tmp*|thumbs.db"));
//! let coordinator = SyncCoordinator::new(context);
//! let outcome = coordinator.run_blocking()?;
//! println!("{} files encrypted", outcome.stats.encrypted);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod attributes;
pub mod context;
pub mod coordinator;
pub mod decision;
pub mod executor;
pub mod pair;
pub mod progress;
pub mod reconcile;
pub mod scan;
pub mod trash;
pub mod watcher;

pub use attributes::clear_archive_attribute;
pub use context::{fold_path, FailureRecords, NotifyIgnoreSet, SyncContext};
pub use coordinator::{StartOutcome, SyncCoordinator, SyncOutcome, SyncRequest, Trigger};
pub use decision::{decide, Decision, PairPolicy, SkipReason};
pub use executor::{restamp, ActionExecutor};
pub use pair::{name_codec, PairEngine, PairOutcome};
pub use progress::{ProgressTracker, SyncPhase, SyncProgress};
pub use reconcile::{ChangeReconciler, ReconcileOutcome};
pub use scan::{enumerate, stat_file, EncryptedSide, FileTreeSnapshot};
pub use trash::{
    delete_file, platform_soft_delete, DeleteMethod, HardDelete, SoftDelete, SystemTrash,
};
pub use watcher::ChangeWatcher;
