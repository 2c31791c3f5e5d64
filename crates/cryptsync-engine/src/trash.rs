//! Recoverable deletion
//!
//! Deletions propagated by a sync pass go to the platform trash (Recycle
//! Bin, macOS Trash, freedesktop home or per-volume trash), so a wrong
//! propagation can be undone by hand. When moving to the trash fails the
//! file is removed outright.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// A way of deleting a file that can be undone
pub trait SoftDelete: Send + Sync + fmt::Debug {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Move `path` out of the way
    fn soft_delete(&self, path: &Path) -> io::Result<()>;
}

/// Permanent removal
#[derive(Debug, Clone, Copy, Default)]
pub struct HardDelete;

impl SoftDelete for HardDelete {
    fn name(&self) -> &'static str {
        "delete"
    }

    fn soft_delete(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

/// The desktop trash of the current platform
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTrash;

impl SoftDelete for SystemTrash {
    fn name(&self) -> &'static str {
        "trash"
    }

    fn soft_delete(&self, path: &Path) -> io::Result<()> {
        // The trash crate reports a missing file inconsistently across platforms
        fs::symlink_metadata(path)?;
        trash::delete(path).map_err(io::Error::other)?;
        debug!("Moved {} to trash", path.display());
        Ok(())
    }
}

/// Soft-delete backend for the current platform
pub fn platform_soft_delete() -> Arc<dyn SoftDelete> {
    Arc::new(SystemTrash)
}

/// How a file ended up deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMethod {
    /// Moved by the soft-delete backend
    Soft,
    /// Removed permanently
    Hard,
}

/// Soft-delete `path`, falling back to permanent removal
pub fn delete_file(soft: &dyn SoftDelete, path: &Path) -> io::Result<DeleteMethod> {
    match soft.soft_delete(path) {
        Ok(()) => Ok(DeleteMethod::Soft),
        Err(e) => {
            warn!(
                "{} failed for {} ({}), deleting permanently",
                soft.name(),
                path.display(),
                e
            );
            fs::remove_file(path)?;
            Ok(DeleteMethod::Hard)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug)]
    struct FailingTrash;

    impl SoftDelete for FailingTrash {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn soft_delete(&self, _path: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "no trash"))
        }
    }

    #[test]
    fn test_fallback_to_hard_delete() {
        let dir = TempDir::new().unwrap();
        let victim = dir.path().join("a.txt");
        fs::write(&victim, "x").unwrap();
        assert_eq!(delete_file(&FailingTrash, &victim).unwrap(), DeleteMethod::Hard);
        assert!(!victim.exists());
    }

    #[test]
    fn test_hard_delete_is_soft_for_the_caller() {
        let dir = TempDir::new().unwrap();
        let victim = dir.path().join("a.txt");
        fs::write(&victim, "x").unwrap();
        assert_eq!(delete_file(&HardDelete, &victim).unwrap(), DeleteMethod::Soft);
        assert!(!victim.exists());
    }

    #[test]
    fn test_system_trash_always_removes_the_file() {
        let dir = TempDir::new().unwrap();
        let victim = dir.path().join("cryptsync trash test.txt");
        fs::write(&victim, "bye").unwrap();

        // Soft where a trash is reachable from the temp dir, hard otherwise
        delete_file(&SystemTrash, &victim).unwrap();
        assert!(!victim.exists());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        let err = SystemTrash.soft_delete(&missing).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(delete_file(&SystemTrash, &missing).is_err());
    }

    #[test]
    fn test_platform_backend_is_the_system_trash() {
        assert_eq!(platform_soft_delete().name(), "trash");
    }
}
