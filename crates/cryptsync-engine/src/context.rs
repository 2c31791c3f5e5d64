//! State shared by the coordinator, the pair engine and the reconciler
//!
//! Each piece sits behind its own lock. Pairs are cloned out before use so
//! that no lock is held while a codec runs.

use crate::trash::{platform_soft_delete, SoftDelete};
use cryptsync_codec::{ArchiveCodec, FilterSet, GpgCodec};
use cryptsync_config::{AppConfig, ConfigResult, SyncPair, DEFAULT_IGNORE_PATTERNS};
use cryptsync_types::{path_is_within, ContentCodec, FailureKind};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Case- and separator-folded form used as a lookup key for absolute paths
pub fn fold_path(path: &Path) -> PathBuf {
    let text = path.to_string_lossy().replace('\\', "/").to_lowercase();
    let trimmed = text.trim_end_matches('/');
    PathBuf::from(if trimmed.is_empty() { "/" } else { trimmed })
}

/// Paths whose last encrypt, decrypt or copy failed
#[derive(Debug, Default)]
pub struct FailureRecords {
    inner: RwLock<BTreeMap<PathBuf, FailureKind>>,
}

impl FailureRecords {
    /// Record a failure, replacing an earlier one for the same path
    pub fn record(&self, path: &Path, kind: FailureKind) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), kind);
    }

    /// Forget the failure for `path`
    pub fn clear(&self, path: &Path) -> Option<FailureKind> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
    }

    /// Recorded failure for `path`
    pub fn get(&self, path: &Path) -> Option<FailureKind> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied()
    }

    /// All records, ordered by path
    pub fn snapshot(&self) -> Vec<(PathBuf, FailureKind)> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(path, kind)| (path.clone(), *kind))
            .collect()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing failed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Paths the engine is about to write or delete
///
/// The reconciler consumes an entry once, so the notification caused by the
/// engine's own write is not acted on.
#[derive(Debug, Default)]
pub struct NotifyIgnoreSet {
    inner: RwLock<HashSet<PathBuf>>,
}

impl NotifyIgnoreSet {
    /// Register a path
    pub fn insert(&self, path: &Path) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fold_path(path));
    }

    /// Remove `path` and report whether it was registered
    pub fn take(&self, path: &Path) -> bool {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&fold_path(path))
    }

    /// Whether `path` is registered
    pub fn contains(&self, path: &Path) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&fold_path(path))
    }

    /// Number of registered paths
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Engine state, constructed once and passed around by `Arc`
pub struct SyncContext {
    pairs: RwLock<Vec<SyncPair>>,
    ignore: RwLock<FilterSet>,
    failures: FailureRecords,
    notify_ignore: NotifyIgnoreSet,
    current_pair: RwLock<Option<PathBuf>>,
    archive_codec: Arc<dyn ContentCodec>,
    gpg_codec: Arc<dyn ContentCodec>,
    soft_delete: Arc<dyn SoftDelete>,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("pairs", &self.pairs().len())
            .field("failures", &self.failures.len())
            .field("archive_codec", &self.archive_codec.name())
            .field("gpg_codec", &self.gpg_codec.name())
            .field("soft_delete", &self.soft_delete.name())
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    /// Context with the default codecs and the platform trash
    pub fn new(pairs: Vec<SyncPair>, ignore_patterns: &str) -> Self {
        Self {
            pairs: RwLock::new(pairs),
            ignore: RwLock::new(FilterSet::parse(ignore_patterns)),
            failures: FailureRecords::default(),
            notify_ignore: NotifyIgnoreSet::default(),
            current_pair: RwLock::new(None),
            archive_codec: Arc::new(ArchiveCodec::new()),
            gpg_codec: Arc::new(GpgCodec::default()),
            soft_delete: platform_soft_delete(),
        }
    }

    /// Context for the pairs and settings of an application configuration
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.pairs.clone(), &config.ignore_patterns)
            .with_gpg_codec(Arc::new(GpgCodec::new(config.gpg_program.clone())))
    }

    /// Replace the archive codec
    pub fn with_archive_codec(mut self, codec: Arc<dyn ContentCodec>) -> Self {
        self.archive_codec = codec;
        self
    }

    /// Replace the GPG codec
    pub fn with_gpg_codec(mut self, codec: Arc<dyn ContentCodec>) -> Self {
        self.gpg_codec = codec;
        self
    }

    /// Replace the soft-delete backend
    pub fn with_soft_delete(mut self, soft_delete: Arc<dyn SoftDelete>) -> Self {
        self.soft_delete = soft_delete;
        self
    }

    /// Copy of all pairs in configured order
    pub fn pairs(&self) -> Vec<SyncPair> {
        self.pairs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Copy of the enabled pairs in configured order
    pub fn enabled_pairs(&self) -> Vec<SyncPair> {
        self.pairs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|pair| pair.enabled)
            .cloned()
            .collect()
    }

    /// Replace all pairs after validating each one
    pub fn set_pairs(&self, pairs: Vec<SyncPair>) -> ConfigResult<()> {
        for pair in &pairs {
            pair.validate()?;
        }
        *self.pairs.write().unwrap_or_else(PoisonError::into_inner) = pairs;
        Ok(())
    }

    /// Enabled pair owning `path` through either root
    pub fn owning_pair(&self, path: &Path) -> Option<SyncPair> {
        self.pairs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|pair| pair.enabled && pair.owns(path))
            .cloned()
    }

    /// Copy of the global ignore list
    pub fn ignore_set(&self) -> FilterSet {
        self.ignore
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the global ignore list
    pub fn set_ignore_patterns(&self, patterns: &str) {
        *self.ignore.write().unwrap_or_else(PoisonError::into_inner) = FilterSet::parse(patterns);
    }

    /// Failure records
    pub fn failures(&self) -> &FailureRecords {
        &self.failures
    }

    /// Paths whose next notification is ignored
    pub fn notify_ignore(&self) -> &NotifyIgnoreSet {
        &self.notify_ignore
    }

    /// Original root of the pair currently being fully scanned
    pub fn current_pair(&self) -> Option<PathBuf> {
        self.current_pair
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the pair with original root `root` is being fully scanned
    pub fn is_scanning(&self, root: &Path) -> bool {
        self.current_pair()
            .is_some_and(|current| path_is_within(&current, root) && path_is_within(root, &current))
    }

    pub(crate) fn set_current_pair(&self, root: Option<PathBuf>) {
        *self
            .current_pair
            .write()
            .unwrap_or_else(PoisonError::into_inner) = root;
    }

    /// Content codec for a pair
    pub fn codec_for(&self, pair: &SyncPair) -> Arc<dyn ContentCodec> {
        if pair.uses_gpg() {
            Arc::clone(&self.gpg_codec)
        } else {
            Arc::clone(&self.archive_codec)
        }
    }

    /// Soft-delete backend
    pub fn soft_delete(&self) -> Arc<dyn SoftDelete> {
        Arc::clone(&self.soft_delete)
    }
}

impl Default for SyncContext {
    fn default() -> Self {
        Self::new(Vec::new(), DEFAULT_IGNORE_PATTERNS)
    }
}
