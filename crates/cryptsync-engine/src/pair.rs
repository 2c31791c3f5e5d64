//! One sync pass over one pair

use crate::context::SyncContext;
use crate::decision::{decide, Decision, PairPolicy, SkipReason};
use crate::executor::ActionExecutor;
use crate::progress::{ProgressTracker, SyncPhase};
use crate::scan::{enumerate, stat_file};
use cryptsync_codec::{FilenameCodec, NameOptions, NameScheme};
use cryptsync_config::SyncPair;
use cryptsync_types::{
    canonical_relative, path_is_within, CancelToken, Error, FileData, Result, SyncErrorFlags,
    SyncStats,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Filename codec configured for `pair`
pub fn name_codec(pair: &SyncPair) -> FilenameCodec {
    FilenameCodec::new(&NameOptions {
        password: pair.password.expose().to_string(),
        encrypt_names: pair.encrypt_names,
        scheme: NameScheme::from_new_scheme_flag(pair.encrypt_names_new_scheme),
        use_archive_format: pair.use_archive_format,
        use_gpg: pair.uses_gpg(),
    })
}

/// Result of running one pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairOutcome {
    /// Error bits raised by the pass
    pub flags: SyncErrorFlags,
    /// Counters
    pub stats: SyncStats,
}

/// Clears the scanning marker when the pass ends
struct ScanMarker<'a>(&'a SyncContext);

impl Drop for ScanMarker<'_> {
    fn drop(&mut self) {
        self.0.set_current_pair(None);
    }
}

/// Runs full passes and single-path syncs for pairs
#[derive(Debug, Clone)]
pub struct PairEngine {
    context: Arc<SyncContext>,
    cancel: CancelToken,
    progress: ProgressTracker,
}

impl PairEngine {
    /// Engine sharing `context`, stopping once `cancel` fires
    pub fn new(context: Arc<SyncContext>, cancel: CancelToken, progress: ProgressTracker) -> Self {
        Self {
            context,
            cancel,
            progress,
        }
    }

    /// Full pass over both folders of `pair`
    ///
    /// The original listing is processed first, then files present only in
    /// the encrypted folder. A per-file failure is counted and the pass goes
    /// on; an unreadable root ends the pass for this pair.
    pub fn run(&self, pair: &SyncPair) -> PairOutcome {
        let mut outcome = PairOutcome::default();
        outcome.stats.pairs = 1;

        info!(
            "Syncing {} with {} ({})",
            pair.original_path.display(),
            pair.encrypted_path.display(),
            pair.sync_direction
        );
        self.context.set_current_pair(Some(pair.original_path.clone()));
        let _marker = ScanMarker(&self.context);
        self.progress.pair_started(pair.original_path.clone());

        if let Err(e) = self.run_inner(pair, &mut outcome) {
            if matches!(e, Error::Cancelled) {
                info!("Sync of {} cancelled", pair.original_path.display());
            } else {
                error!("Skipping {}: {}", pair.original_path.display(), e);
            }
            outcome.flags |= e.flag();
        }
        self.progress.pair_completed();
        outcome
    }

    fn run_inner(&self, pair: &SyncPair, outcome: &mut PairOutcome) -> Result<()> {
        if !pair.original_path.is_dir() {
            return Err(Error::access(
                &pair.original_path,
                "original folder does not exist",
            ));
        }
        if !pair.encrypted_path.exists() {
            info!("Creating {}", pair.encrypted_path.display());
            fs::create_dir_all(&pair.encrypted_path)
                .map_err(|e| Error::access(&pair.encrypted_path, e.to_string()))?;
        }

        let ignore = self.context.ignore_set();
        let policy = PairPolicy::from_pair(pair, &ignore);
        let executor = ActionExecutor::new(
            Arc::clone(&self.context),
            pair.clone(),
            self.cancel.clone(),
        );

        self.progress.set_phase(SyncPhase::ScanningOriginal);
        let originals = enumerate(&pair.original_path, None, &ignore)?;
        self.cancel.check()?;
        self.progress.set_phase(SyncPhase::ScanningEncrypted);
        let encrypted = enumerate(&pair.encrypted_path, Some(executor.encrypted_side()), &ignore)?;
        self.cancel.check()?;

        let encrypted_only: Vec<&FileData> = encrypted
            .iter()
            .filter(|(key, _)| !originals.contains_key(*key))
            .map(|(_, data)| data)
            .collect();
        self.progress.set_phase(SyncPhase::Processing);
        self.progress
            .set_total_files((originals.len() + encrypted_only.len()) as u64);
        debug!(
            "{} original and {} encrypted files listed",
            originals.len(),
            encrypted.len()
        );

        for (key, orig) in &originals {
            self.process(&executor, &policy, Some(orig), encrypted.get(key), outcome)?;
            self.cancel.check()?;
        }
        for crypt in encrypted_only {
            self.process(&executor, &policy, None, Some(crypt), outcome)?;
            self.cancel.check()?;
        }
        Ok(())
    }

    /// Decide and act for one path, folding the result into `outcome`
    ///
    /// Only cancellation is returned as an error.
    fn process(
        &self,
        executor: &ActionExecutor,
        policy: &PairPolicy,
        orig: Option<&FileData>,
        crypt: Option<&FileData>,
        outcome: &mut PairOutcome,
    ) -> Result<()> {
        let Some(relative) = orig.or(crypt).map(|data| data.relative_path.as_str()) else {
            return Ok(());
        };
        self.progress.file_started(relative);
        let decision = decide(orig, crypt, policy);
        log_decision(relative, decision);

        let result = executor.execute(decision, orig, crypt);
        self.progress.file_completed(result.is_err());
        match result {
            Ok(true) => count(&mut outcome.stats, decision),
            Ok(false) => outcome.stats.skipped += 1,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                error!("{}: {} failed: {}", relative, decision, e);
                outcome.stats.failed += 1;
                outcome.flags |= e.flag();
            }
        }
        Ok(())
    }

    /// Sync the single file at `path`, which lies under a root of `pair`
    ///
    /// Both sides are looked up directly instead of listing the folders.
    pub fn sync_path(&self, pair: &SyncPair, path: &Path) -> Result<Decision> {
        let ignore = self.context.ignore_set();
        let policy = PairPolicy::from_pair(pair, &ignore);
        let executor = ActionExecutor::new(
            Arc::clone(&self.context),
            pair.clone(),
            self.cancel.clone(),
        );
        let names = executor.names();

        let (orig, crypt) = if path_is_within(&pair.original_path, path) {
            let relative = relative_below(&pair.original_path, path);
            let orig = stat_file(&pair.original_path, &relative, &relative, false)?;
            let crypt = find_counterpart(pair, names, &policy, &relative)?;
            (orig, crypt)
        } else if path_is_within(&pair.encrypted_path, path) {
            let disk_rel = relative_below(&pair.encrypted_path, path);
            let decoded = executor.encrypted_side().decode_listed(&disk_rel, path);
            let crypt = stat_file(
                &pair.encrypted_path,
                &decoded.plain,
                &disk_rel,
                decoded.was_encrypted,
            )?;
            let orig = stat_file(&pair.original_path, &decoded.plain, &decoded.plain, false)?;
            (orig, crypt)
        } else {
            return Err(Error::other(format!(
                "{} is not inside {}",
                path.display(),
                pair.original_path.display()
            )));
        };

        let decision = decide(orig.as_ref(), crypt.as_ref(), &policy);
        if let Some(relative) = orig.as_ref().or(crypt.as_ref()) {
            log_decision(&relative.relative_path, decision);
        }
        executor.execute(decision, orig.as_ref(), crypt.as_ref())?;
        Ok(decision)
    }
}

/// Path of `path` relative to `root`, which contains it
///
/// `root` may differ in case, so whole components are skipped.
fn relative_below(root: &Path, path: &Path) -> String {
    let depth = root.components().count();
    let rest: Vec<String> = path
        .components()
        .skip(depth)
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    canonical_relative(&rest.join("/"))
}

/// Encrypted-folder file for a plaintext path
///
/// Copy-only files are looked for under their plain name first.
fn find_counterpart(
    pair: &SyncPair,
    names: &FilenameCodec,
    policy: &PairPolicy,
    relative: &str,
) -> Result<Option<FileData>> {
    let encoded = names.encode(relative);
    let mut candidates = vec![(encoded, true)];
    if policy.is_copy_only(relative) {
        candidates.insert(0, (relative.to_string(), false));
    }
    for (disk_rel, was_encrypted) in candidates {
        if let Some(data) = stat_file(&pair.encrypted_path, relative, &disk_rel, was_encrypted)? {
            return Ok(Some(data));
        }
    }
    Ok(None)
}

fn log_decision(relative: &str, decision: Decision) {
    match decision {
        Decision::Skip(SkipReason::Filtered) => trace!("{}: filtered", relative),
        Decision::Skip(SkipReason::UpToDate) => debug!("{}: up to date", relative),
        Decision::Skip(SkipReason::DeletionNotSynced) => info!(
            "{} exists on one side only, deletions are not synchronized",
            relative
        ),
        Decision::Skip(SkipReason::DirectionBlocked) => {
            info!("{}: newer side may not be copied back, skipping", relative);
        }
        Decision::DeleteOriginal | Decision::DeleteEncrypted => {
            warn!("{} does not exist on the other side: {}", relative, decision);
        }
        _ => info!("{}: {}", relative, decision),
    }
}

fn count(stats: &mut SyncStats, decision: Decision) {
    match decision {
        Decision::Encrypt { .. } => stats.encrypted += 1,
        Decision::Decrypt => stats.decrypted += 1,
        Decision::CopyToEncrypted | Decision::CopyToOriginal => stats.copied += 1,
        Decision::DeleteOriginal | Decision::DeleteEncrypted => stats.deleted += 1,
        Decision::ClearArchiveAttribute | Decision::Skip(_) => stats.skipped += 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trash::HardDelete;
    use cryptsync_codec::{ArchiveCodec, KdfParams};
    use cryptsync_types::{Cancellable, SyncDirection};
    use filetime::FileTime;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SyncPair, PairEngine) {
        let dir = TempDir::new().unwrap();
        let orig = dir.path().join("plain");
        let crypt = dir.path().join("crypt");
        fs::create_dir_all(&orig).unwrap();
        let pair = SyncPair::new(&orig, &crypt, "pw");
        let context = Arc::new(
            SyncContext::default()
                .with_archive_codec(Arc::new(ArchiveCodec::with_kdf(KdfParams {
                    memory_kib: 64,
                    iterations: 1,
                })))
                .with_soft_delete(Arc::new(HardDelete)),
        );
        let engine = PairEngine::new(context, CancelToken::new(), ProgressTracker::new());
        (dir, pair, engine)
    }

    fn write(root: &Path, rel: &str, contents: &str, secs: i64) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(secs, 0)).unwrap();
    }

    #[test]
    fn test_round_trip_through_both_directions() {
        let (_dir, mut pair, engine) = setup();
        pair.encrypt_names = true;
        write(&pair.original_path, "docs/a.txt", "first", 1_000);

        let outcome = engine.run(&pair);
        assert!(outcome.flags.is_empty());
        assert_eq!(outcome.stats.encrypted, 1);
        assert!(pair.encrypted_path.exists());

        let second = engine.run(&pair);
        assert_eq!(second.stats.actions(), 0);
        assert_eq!(second.stats.skipped, 1);

        fs::remove_file(pair.original_path.join("docs/a.txt")).unwrap();
        pair.sync_direction = SyncDirection::DstToSrc;
        let restored = engine.run(&pair);
        assert_eq!(restored.stats.decrypted, 1);
        assert_eq!(
            fs::read_to_string(pair.original_path.join("docs/a.txt")).unwrap(),
            "first"
        );
        assert!(engine.context.current_pair().is_none());
    }

    #[test]
    fn test_extensionless_file_is_encrypted_once() {
        let (_dir, mut pair, engine) = setup();
        write(&pair.original_path, "Makefile", "all:", 1_000);

        let first = engine.run(&pair);
        assert_eq!(first.stats.encrypted, 1);
        assert!(pair.encrypted_path.join("Makefile.7z").exists());
        for _ in 0..2 {
            let again = engine.run(&pair);
            assert_eq!(again.stats.actions(), 0);
            assert_eq!(again.stats.skipped, 1);
        }

        fs::remove_file(pair.original_path.join("Makefile")).unwrap();
        pair.sync_direction = SyncDirection::DstToSrc;
        let restored = engine.run(&pair);
        assert_eq!(restored.stats.decrypted, 1);
        assert_eq!(
            fs::read_to_string(pair.original_path.join("Makefile")).unwrap(),
            "all:"
        );
        assert!(!pair.original_path.join("Makefile.7z").exists());
    }

    #[test]
    fn test_user_archive_in_encrypted_folder_keeps_its_name() {
        let (_dir, mut pair, engine) = setup();
        pair.sync_direction = SyncDirection::DstToSrc;
        write(&pair.encrypted_path, "backup.7z", "7z user archive", 1_000);

        let outcome = engine.run(&pair);
        assert_eq!(outcome.stats.failed, 0);
        assert_eq!(
            fs::read_to_string(pair.original_path.join("backup.7z")).unwrap(),
            "7z user archive"
        );
        assert!(!pair.original_path.join("backup").exists());
    }

    #[test]
    fn test_missing_original_root_is_access_denied() {
        let (dir, _pair, engine) = setup();
        let pair = SyncPair::new(dir.path().join("nope"), dir.path().join("crypt2"), "pw");
        let outcome = engine.run(&pair);
        assert!(outcome.flags.contains(SyncErrorFlags::ACCESS_DENIED));
        assert!(!dir.path().join("crypt2").exists());
    }

    #[test]
    fn test_cancelled_before_processing() {
        let (_dir, pair, engine) = setup();
        write(&pair.original_path, "a.txt", "x", 1_000);
        engine.cancel.cancel();
        let outcome = engine.run(&pair);
        assert!(outcome.flags.contains(SyncErrorFlags::CANCELLED));
        assert_eq!(outcome.stats.encrypted, 0);
    }

    #[test]
    fn test_sync_path_from_either_side() {
        let (_dir, pair, engine) = setup();
        write(&pair.original_path, "Notes/a.txt", "x", 1_000);
        fs::create_dir_all(&pair.encrypted_path).unwrap();

        let decision = engine
            .sync_path(&pair, &pair.original_path.join("Notes/a.txt"))
            .unwrap();
        assert!(matches!(decision, Decision::Encrypt { .. }));
        let archive = pair.encrypted_path.join("Notes/a.txt.7z");
        assert!(archive.exists());

        let again = engine.sync_path(&pair, &archive).unwrap();
        assert_eq!(again, Decision::Skip(SkipReason::UpToDate));
    }

    #[test]
    fn test_relative_below_ignores_root_case() {
        assert_eq!(
            relative_below(Path::new("/Data/Plain"), Path::new("/data/plain/sub/a.txt")),
            "sub/a.txt"
        );
    }
}
