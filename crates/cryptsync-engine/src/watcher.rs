//! Filesystem change notifications
//!
//! Wraps the platform watcher from `notify`. Changed paths accumulate in a
//! set that the caller drains on a timer.

use cryptsync_config::SyncPair;
use cryptsync_types::{Error, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

type ChangedPaths = Arc<Mutex<BTreeSet<PathBuf>>>;

fn collect_event(changed: &ChangedPaths, event: Event) {
    if matches!(event.kind, EventKind::Access(_)) {
        return;
    }
    changed
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .extend(event.paths);
}

/// Recursive watcher over a set of folders
pub struct ChangeWatcher {
    watcher: RecommendedWatcher,
    changed: ChangedPaths,
    watched: BTreeSet<PathBuf>,
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("watched", &self.watched)
            .finish_non_exhaustive()
    }
}

impl ChangeWatcher {
    /// Create a watcher with nothing watched yet
    pub fn new() -> Result<Self> {
        let changed = ChangedPaths::default();
        let sink = Arc::clone(&changed);
        let watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            match event {
                Ok(event) => collect_event(&sink, event),
                Err(e) => warn!("Folder watcher error: {}", e),
            }
        })
        .map_err(|e| Error::other(format!("cannot start folder watcher: {}", e)))?;

        Ok(Self {
            watcher,
            changed,
            watched: BTreeSet::new(),
        })
    }

    /// Watch `dir` and everything below it
    pub fn add_watch(&mut self, dir: &Path) -> Result<()> {
        if self.watched.contains(dir) {
            return Ok(());
        }
        self.watcher
            .watch(dir, RecursiveMode::Recursive)
            .map_err(|e| Error::access(dir, e.to_string()))?;
        debug!("Watching {}", dir.display());
        self.watched.insert(dir.to_path_buf());
        Ok(())
    }

    /// Stop watching `dir`
    pub fn remove_watch(&mut self, dir: &Path) -> Result<()> {
        if !self.watched.remove(dir) {
            return Ok(());
        }
        self.watcher
            .unwatch(dir)
            .map_err(|e| Error::other(format!("cannot unwatch {}: {}", dir.display(), e)))?;
        debug!("No longer watching {}", dir.display());
        Ok(())
    }

    /// Folders being watched
    pub fn watched(&self) -> impl Iterator<Item = &Path> {
        self.watched.iter().map(PathBuf::as_path)
    }

    /// Take every path changed since the last call
    pub fn get_changed_paths(&self) -> BTreeSet<PathBuf> {
        mem::take(&mut *self.changed.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Watch both roots of every enabled pair and nothing else
    ///
    /// A root that cannot be watched is logged and skipped.
    pub fn sync_with_pairs(&mut self, pairs: &[SyncPair]) {
        let wanted: BTreeSet<PathBuf> = pairs
            .iter()
            .filter(|pair| pair.enabled)
            .flat_map(|pair| [pair.original_path.clone(), pair.encrypted_path.clone()])
            .collect();

        let stale: Vec<PathBuf> = self.watched.difference(&wanted).cloned().collect();
        for dir in stale {
            if let Err(e) = self.remove_watch(&dir) {
                warn!("{}", e);
            }
        }
        for dir in &wanted {
            if !dir.exists() {
                info!("{} does not exist yet, not watching it", dir.display());
                continue;
            }
            if let Err(e) = self.add_watch(dir) {
                warn!("Cannot watch {}: {}", dir.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind};
    use std::fs;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    #[test]
    fn test_access_events_are_dropped() {
        let changed = ChangedPaths::default();
        collect_event(
            &changed,
            Event::new(EventKind::Access(AccessKind::Any)).add_path(PathBuf::from("/a")),
        );
        collect_event(
            &changed,
            Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/b")),
        );
        let paths = changed.lock().unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths.contains(Path::new("/b")));
    }

    #[test]
    fn test_changes_are_drained() {
        let dir = TempDir::new().unwrap();
        let mut watcher = ChangeWatcher::new().unwrap();
        watcher.add_watch(dir.path()).unwrap();
        watcher.add_watch(dir.path()).unwrap();
        assert_eq!(watcher.watched().count(), 1);

        fs::write(dir.path().join("new.txt"), "x").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = BTreeSet::new();
        while Instant::now() < deadline {
            seen.extend(watcher.get_changed_paths());
            if seen.iter().any(|p| p.ends_with("new.txt")) {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(seen.iter().any(|p| p.ends_with("new.txt")));

        watcher.remove_watch(dir.path()).unwrap();
        assert_eq!(watcher.watched().count(), 0);
    }

    #[test]
    fn test_sync_with_pairs() {
        let dir = TempDir::new().unwrap();
        let orig = dir.path().join("plain");
        let crypt = dir.path().join("crypt");
        fs::create_dir_all(&orig).unwrap();
        fs::create_dir_all(&crypt).unwrap();

        let mut watcher = ChangeWatcher::new().unwrap();
        let mut pair = SyncPair::new(&orig, &crypt, "pw");
        watcher.sync_with_pairs(std::slice::from_ref(&pair));
        assert_eq!(watcher.watched().count(), 2);

        pair.enabled = false;
        watcher.sync_with_pairs(&[pair]);
        assert_eq!(watcher.watched().count(), 0);
    }
}
