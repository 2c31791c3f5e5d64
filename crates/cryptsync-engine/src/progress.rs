//! Progress tracking for sync passes

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

/// Phases of a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No pass has started
    Idle,
    /// Listing the original folder
    ScanningOriginal,
    /// Listing the encrypted folder
    ScanningEncrypted,
    /// Deciding and applying actions
    Processing,
    /// Pass finished
    Completed,
    /// Pass stopped on request
    Cancelled,
}

/// Snapshot of a running or finished pass
#[derive(Debug, Clone)]
pub struct SyncProgress {
    /// Current phase
    pub phase: SyncPhase,
    /// Original root of the pair being processed
    pub current_pair: Option<PathBuf>,
    /// Relative path being processed
    pub current_file: Option<String>,
    /// Pairs finished in this pass
    pub pairs_processed: u64,
    /// Enabled pairs in this pass
    pub total_pairs: u64,
    /// Paths decided in the current pair
    pub files_processed: u64,
    /// Paths in the current pair
    pub total_files: u64,
    /// Actions that failed so far
    pub errors_count: u64,
    /// Start of the pass
    pub start_time: Instant,
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            current_pair: None,
            current_file: None,
            pairs_processed: 0,
            total_pairs: 0,
            files_processed: 0,
            total_files: 0,
            errors_count: 0,
            start_time: Instant::now(),
        }
    }
}

impl SyncProgress {
    /// Progress of the current pair in percent
    pub fn file_progress(&self) -> f64 {
        if self.total_files > 0 {
            (self.files_processed as f64 / self.total_files as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Elapsed time since the pass started
    pub fn elapsed_time(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Whether the pass has ended
    pub fn is_complete(&self) -> bool {
        matches!(self.phase, SyncPhase::Completed | SyncPhase::Cancelled)
    }

    /// Elapsed time as `1h 2m 3s`
    pub fn format_elapsed(&self) -> String {
        format_duration(self.elapsed_time())
    }
}

/// Shared handle updated by the worker and read by callers
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    progress: Arc<RwLock<SyncProgress>>,
}

impl ProgressTracker {
    /// Create a tracker in the idle phase
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current progress
    pub fn snapshot(&self) -> SyncProgress {
        self.progress
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut SyncProgress)) {
        f(&mut self.progress.write().unwrap_or_else(PoisonError::into_inner));
    }

    /// Reset for a new pass over `total_pairs` pairs
    pub fn start_pass(&self, total_pairs: u64) {
        self.update(|p| {
            *p = SyncProgress {
                total_pairs,
                start_time: Instant::now(),
                ..SyncProgress::default()
            };
        });
    }

    /// Update the current phase
    pub fn set_phase(&self, phase: SyncPhase) {
        self.update(|p| p.phase = phase);
        debug!("Sync phase changed to: {:?}", phase);
    }

    /// A pair started
    pub fn pair_started(&self, original: PathBuf) {
        self.update(|p| {
            p.current_pair = Some(original);
            p.current_file = None;
            p.files_processed = 0;
            p.total_files = 0;
        });
    }

    /// Paths to decide in the current pair
    pub fn set_total_files(&self, total_files: u64) {
        self.update(|p| p.total_files = total_files);
    }

    /// A path is being processed
    pub fn file_started(&self, relative: &str) {
        self.update(|p| p.current_file = Some(relative.to_string()));
    }

    /// A path was decided; `failed` when its action failed
    pub fn file_completed(&self, failed: bool) {
        self.update(|p| {
            p.files_processed += 1;
            p.current_file = None;
            if failed {
                p.errors_count += 1;
            }
        });
    }

    /// The current pair is done
    pub fn pair_completed(&self) {
        self.update(|p| {
            p.pairs_processed += 1;
            p.current_pair = None;
        });
    }

    /// The pass ended
    pub fn finish(&self, cancelled: bool) {
        self.set_phase(if cancelled {
            SyncPhase::Cancelled
        } else {
            SyncPhase::Completed
        });
        self.update(|p| {
            p.current_pair = None;
            p.current_file = None;
        });
    }
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
