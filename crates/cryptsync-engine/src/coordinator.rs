//! Sync coordinator
//!
//! Runs full passes over every enabled pair on a single worker thread.
//! Interactive requests take priority: they replace a running background
//! pass, while background requests arriving during any pass are dropped.

use crate::context::SyncContext;
use crate::pair::PairEngine;
use crate::progress::{ProgressTracker, SyncProgress};
use cryptsync_types::{
    CancelToken, Cancellable, Error, FailureKind, Result, SyncErrorFlags, SyncStats,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Who asked for a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A user waiting for the result
    Interactive,
    /// Timer or change notifications
    Background,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interactive => "interactive",
            Self::Background => "background",
        })
    }
}

/// Request for a full pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    /// Origin of the request
    pub trigger: Trigger,
}

impl SyncRequest {
    /// Request made on behalf of a user
    pub const fn interactive() -> Self {
        Self {
            trigger: Trigger::Interactive,
        }
    }

    /// Request made by a timer or the change watcher
    pub const fn background() -> Self {
        Self {
            trigger: Trigger::Background,
        }
    }
}

/// What [`SyncCoordinator::start`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A pass was started
    Started,
    /// A background pass was cancelled and an interactive one started
    Restarted,
    /// An interactive pass is already running
    AlreadyRunning,
    /// Another pass is running, the background request was dropped
    Dropped,
}

/// Result of a finished pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Error bits, `CANCELLED` when the pass was stopped
    pub flags: SyncErrorFlags,
    /// Failure records after the pass
    pub failures: Vec<(PathBuf, FailureKind)>,
    /// Counters summed over all pairs
    pub stats: SyncStats,
    /// Origin of the pass
    pub trigger: Trigger,
}

#[derive(Debug, Default)]
struct State {
    running: Option<Trigger>,
    last: Option<SyncOutcome>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    done: Condvar,
}

impl Shared {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Publishes the end of a pass, also when the worker unwinds
///
/// A pass that panicked leaves no outcome behind.
struct PassFinished {
    shared: Arc<Shared>,
    outcome: Option<SyncOutcome>,
}

impl Drop for PassFinished {
    fn drop(&mut self) {
        let mut state = self.shared.state();
        state.running = None;
        state.last = self.outcome.take();
        drop(state);
        self.shared.done.notify_all();
    }
}

/// Starts, stops and waits for sync passes
#[derive(Debug)]
pub struct SyncCoordinator {
    context: Arc<SyncContext>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: Mutex<CancelToken>,
    progress: ProgressTracker,
}

impl SyncCoordinator {
    /// Coordinator for the pairs in `context`
    pub fn new(context: Arc<SyncContext>) -> Self {
        Self {
            context,
            shared: Arc::new(Shared::default()),
            worker: Mutex::new(None),
            cancel: Mutex::new(CancelToken::new()),
            progress: ProgressTracker::new(),
        }
    }

    /// Shared engine state
    pub fn context(&self) -> &Arc<SyncContext> {
        &self.context
    }

    /// Start a pass unless the priority rules say otherwise
    pub fn start(&self, request: SyncRequest) -> Result<StartOutcome> {
        // Holding the worker slot serializes concurrent start calls
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);

        let running = self.shared.state().running;
        let outcome = match (running, request.trigger) {
            (None, _) => StartOutcome::Started,
            (Some(_), Trigger::Background) => {
                debug!("Pass already running, dropping background request");
                return Ok(StartOutcome::Dropped);
            }
            (Some(Trigger::Interactive), Trigger::Interactive) => {
                return Ok(StartOutcome::AlreadyRunning);
            }
            (Some(Trigger::Background), Trigger::Interactive) => {
                info!("Cancelling background pass for an interactive one");
                self.cancel_current();
                StartOutcome::Restarted
            }
        };

        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                warn!("Sync worker panicked");
            }
        }

        let cancel = CancelToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = cancel.clone();
        self.shared.state().running = Some(request.trigger);

        let context = Arc::clone(&self.context);
        let shared = Arc::clone(&self.shared);
        let progress = self.progress.clone();
        let trigger = request.trigger;
        let spawned = thread::Builder::new()
            .name("cryptsync-sync".to_string())
            .spawn(move || {
                let mut finished = PassFinished {
                    shared,
                    outcome: None,
                };
                finished.outcome = Some(run_pass(&context, &cancel, &progress, trigger));
            });

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(outcome)
            }
            Err(e) => {
                self.shared.state().running = None;
                Err(Error::other(format!("cannot start sync worker: {}", e)))
            }
        }
    }

    fn cancel_current(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Ask the running pass to stop after the current file
    pub fn stop(&self) {
        if self.is_running() {
            info!("Stopping sync");
        }
        self.cancel_current();
    }

    /// Wait for the running pass to finish
    ///
    /// Returns the outcome of the most recent pass, or `None` on timeout,
    /// when no pass ever ran or when the last pass panicked.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<SyncOutcome> {
        let state = self.shared.state();
        let state = match timeout {
            None => self
                .shared
                .done
                .wait_while(state, |s| s.running.is_some())
                .unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                let (state, result) = self
                    .shared
                    .done
                    .wait_timeout_while(state, timeout, |s| s.running.is_some())
                    .unwrap_or_else(PoisonError::into_inner);
                if result.timed_out() && state.running.is_some() {
                    return None;
                }
                state
            }
        };
        state.last.clone()
    }

    /// Start an interactive pass and wait for it
    pub fn run_blocking(&self) -> Result<SyncOutcome> {
        self.start(SyncRequest::interactive())?;
        self.wait(None)
            .ok_or_else(|| Error::other("sync pass produced no result"))
    }

    /// Whether a pass is running
    pub fn is_running(&self) -> bool {
        self.shared.state().running.is_some()
    }

    /// Origin of the running pass
    pub fn running_trigger(&self) -> Option<Trigger> {
        self.shared.state().running
    }

    /// Progress of the running or last pass
    pub fn progress(&self) -> SyncProgress {
        self.progress.snapshot()
    }

    /// Original root of the pair being processed
    pub fn current_pair(&self) -> Option<PathBuf> {
        self.context.current_pair()
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.cancel_current();
        let handle = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn run_pass(
    context: &Arc<SyncContext>,
    cancel: &CancelToken,
    progress: &ProgressTracker,
    trigger: Trigger,
) -> SyncOutcome {
    let pairs = context.enabled_pairs();
    info!("Starting {} sync of {} pairs", trigger, pairs.len());
    progress.start_pass(pairs.len() as u64);

    let engine = PairEngine::new(Arc::clone(context), cancel.clone(), progress.clone());
    let mut flags = SyncErrorFlags::empty();
    let mut stats = SyncStats::new();
    for pair in &pairs {
        if cancel.is_cancelled() {
            break;
        }
        let outcome = engine.run(pair);
        flags |= outcome.flags;
        stats.merge(&outcome.stats);
    }
    if cancel.is_cancelled() {
        flags |= SyncErrorFlags::CANCELLED;
    }
    progress.finish(flags.contains(SyncErrorFlags::CANCELLED));

    info!(
        "Sync finished ({}): {} encrypted, {} decrypted, {} copied, {} deleted, {} failed",
        flags, stats.encrypted, stats.decrypted, stats.copied, stats.deleted, stats.failed
    );
    SyncOutcome {
        flags,
        failures: context.failures().snapshot(),
        stats,
        trigger,
    }
}
