//! Single-path reconciliation for change notifications

use crate::context::SyncContext;
use crate::decision::Decision;
use crate::pair::PairEngine;
use crate::progress::ProgressTracker;
use cryptsync_types::CancelToken;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What happened to a changed path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The engine wrote the path itself
    Suppressed,
    /// No enabled pair contains the path
    Unowned,
    /// The owning pair is being fully scanned; retry later
    Requeue,
    /// Directories are handled by their files
    Skipped,
    /// A decision was made and applied
    Handled(Decision),
    /// The action failed
    Failed(String),
}

/// Applies the decision table to single changed paths
#[derive(Debug, Clone)]
pub struct ChangeReconciler {
    context: Arc<SyncContext>,
    engine: PairEngine,
}

impl ChangeReconciler {
    /// Reconciler sharing `context` with the coordinator
    pub fn new(context: Arc<SyncContext>) -> Self {
        let engine = PairEngine::new(
            Arc::clone(&context),
            CancelToken::new(),
            ProgressTracker::new(),
        );
        Self { context, engine }
    }

    /// Handle one changed absolute path
    pub fn handle(&self, path: &Path) -> ReconcileOutcome {
        if self.context.notify_ignore().take(path) {
            trace!("Ignoring own change to {}", path.display());
            return ReconcileOutcome::Suppressed;
        }
        let Some(pair) = self.context.owning_pair(path) else {
            return ReconcileOutcome::Unowned;
        };
        if self.context.is_scanning(&pair.original_path) {
            debug!(
                "{} is being scanned, retrying {} later",
                pair.original_path.display(),
                path.display()
            );
            return ReconcileOutcome::Requeue;
        }
        if path.is_dir() {
            return ReconcileOutcome::Skipped;
        }

        match self.engine.sync_path(&pair, path) {
            Ok(decision) => ReconcileOutcome::Handled(decision),
            Err(e) => {
                warn!("Change to {} not applied: {}", path.display(), e);
                ReconcileOutcome::Failed(e.to_string())
            }
        }
    }

    /// Handle a batch of paths, returning those to retry later
    pub fn handle_all<I>(&self, paths: I) -> Vec<PathBuf>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        paths
            .into_iter()
            .filter(|path| self.handle(path) == ReconcileOutcome::Requeue)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::SkipReason;
    use crate::trash::HardDelete;
    use cryptsync_codec::{ArchiveCodec, KdfParams};
    use cryptsync_config::SyncPair;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SyncPair, ChangeReconciler) {
        let dir = TempDir::new().unwrap();
        let orig = dir.path().join("plain");
        let crypt = dir.path().join("crypt");
        fs::create_dir_all(&orig).unwrap();
        fs::create_dir_all(&crypt).unwrap();
        let pair = SyncPair::new(&orig, &crypt, "pw");
        let context = SyncContext::new(vec![pair.clone()], "*.tmp*")
            .with_archive_codec(Arc::new(ArchiveCodec::with_kdf(KdfParams {
                memory_kib: 64,
                iterations: 1,
            })))
            .with_soft_delete(Arc::new(HardDelete));
        (dir, pair, ChangeReconciler::new(Arc::new(context)))
    }

    #[test]
    fn test_new_file_is_encrypted_once() {
        let (_dir, pair, reconciler) = setup();
        let file = pair.original_path.join("a.txt");
        fs::write(&file, "hello").unwrap();

        let outcome = reconciler.handle(&file);
        assert!(matches!(outcome, ReconcileOutcome::Handled(Decision::Encrypt { .. })));

        let archive = pair.encrypted_path.join("a.txt.7z");
        assert!(archive.exists());
        // The notification for the archive the engine just wrote
        assert_eq!(reconciler.handle(&archive), ReconcileOutcome::Suppressed);
        assert_eq!(
            reconciler.handle(&archive),
            ReconcileOutcome::Handled(Decision::Skip(SkipReason::UpToDate))
        );
    }

    #[test]
    fn test_unowned_and_directories() {
        let (dir, pair, reconciler) = setup();
        assert_eq!(
            reconciler.handle(&dir.path().join("elsewhere/a.txt")),
            ReconcileOutcome::Unowned
        );
        fs::create_dir_all(pair.original_path.join("sub")).unwrap();
        assert_eq!(
            reconciler.handle(&pair.original_path.join("sub")),
            ReconcileOutcome::Skipped
        );
    }

    #[test]
    fn test_requeue_while_pair_is_scanned() {
        let (_dir, pair, reconciler) = setup();
        let file = pair.original_path.join("a.txt");
        fs::write(&file, "x").unwrap();

        reconciler
            .context
            .set_current_pair(Some(pair.original_path.clone()));
        assert_eq!(reconciler.handle(&file), ReconcileOutcome::Requeue);
        assert_eq!(reconciler.handle_all(vec![file.clone()]), vec![file.clone()]);

        reconciler.context.set_current_pair(None);
        assert!(reconciler.handle_all(vec![file]).is_empty());
    }

    #[test]
    fn test_ignored_paths_are_filtered() {
        let (_dir, pair, reconciler) = setup();
        let file = pair.original_path.join("draft.tmp");
        fs::write(&file, "x").unwrap();
        assert_eq!(
            reconciler.handle(&file),
            ReconcileOutcome::Handled(Decision::Skip(SkipReason::Filtered))
        );
        assert_eq!(fs::read_dir(&pair.encrypted_path).unwrap().count(), 0);
    }

    #[test]
    fn test_deleted_original_is_not_restored() {
        let (_dir, mut pair, _) = setup();
        pair.sync_deletions = true;
        let context =
            Arc::new(SyncContext::new(vec![pair.clone()], "").with_soft_delete(Arc::new(HardDelete)));
        let reconciler = ChangeReconciler::new(context);
        let archive = pair.encrypted_path.join("gone.txt.7z");
        fs::write(&archive, "stale").unwrap();

        let outcome = reconciler.handle(&pair.original_path.join("gone.txt"));
        assert_eq!(outcome, ReconcileOutcome::Handled(Decision::DeleteEncrypted));
        assert!(!archive.exists());
        assert_eq!(reconciler.handle(&archive), ReconcileOutcome::Suppressed);
    }
}
