//! Folder enumeration
//!
//! Builds the snapshot of one side of a pair. The encrypted side is listed
//! through the filename codec so both snapshots are keyed by plaintext path.

use cryptsync_codec::{DecodedName, FilenameCodec, FilterSet};
use cryptsync_types::{canonical_relative, ContentCodec, Error, FileData, RelativeKey, Result};
use filetime::FileTime;
use std::collections::BTreeMap;
use std::fs::Metadata;
use std::io;
use std::path::Path;
use tracing::{trace, warn};
use walkdir::{DirEntry, WalkDir};

/// Files of one folder keyed by case-insensitive plaintext path
pub type FileTreeSnapshot = BTreeMap<RelativeKey, FileData>;

/// Codecs needed to list an encrypted folder
#[derive(Debug, Clone, Copy)]
pub struct EncryptedSide<'a> {
    /// Maps on-disk names to plaintext paths
    pub names: &'a FilenameCodec,
    /// Recognizes archives the user dropped into the folder
    pub content: &'a dyn ContentCodec,
}

impl EncryptedSide<'_> {
    /// Decode `disk_rel`, found at `path` while listing
    pub fn decode_listed(&self, disk_rel: &str, path: &Path) -> DecodedName {
        self.names
            .decode_listed(disk_rel, || self.content.is_foreign(path))
    }
}

/// Modification time, or the creation time when the write time is zero
pub fn effective_mtime(metadata: &Metadata) -> FileTime {
    let modified = FileTime::from_last_modification_time(metadata);
    if modified.unix_seconds() == 0 && modified.nanoseconds() == 0 {
        FileTime::from_creation_time(metadata).unwrap_or(modified)
    } else {
        modified
    }
}

fn relative_of(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .and_then(Path::to_str)
        .map(canonical_relative)
}

fn is_ignored_dir(
    entry: &DirEntry,
    root: &Path,
    side: Option<EncryptedSide<'_>>,
    ignore: &FilterSet,
) -> bool {
    if !entry.file_type().is_dir() || ignore.is_empty() {
        return false;
    }
    let Some(disk_rel) = relative_of(root, entry.path()) else {
        return false;
    };
    if ignore.is_match(&disk_rel) {
        return true;
    }
    side.is_some_and(|side| ignore.is_match(&side.names.decode(&disk_rel).plain))
}

/// List every file below `root`
///
/// For an encrypted folder the on-disk names are decoded. Ignored
/// directories are not descended into and ignored files are left out. Any
/// error while walking fails the whole listing.
pub fn enumerate(
    root: &Path,
    side: Option<EncryptedSide<'_>>,
    ignore: &FilterSet,
) -> Result<FileTreeSnapshot> {
    let root_meta = std::fs::metadata(root).map_err(|e| Error::access(root, e.to_string()))?;
    if !root_meta.is_dir() {
        return Err(Error::access(root, "not a directory"));
    }

    let mut snapshot = FileTreeSnapshot::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !is_ignored_dir(entry, root, side, ignore));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::access(path, e.to_string())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Some(disk_rel) = relative_of(root, entry.path()) else {
            warn!("Skipping file with a non UTF-8 name: {}", entry.path().display());
            continue;
        };
        let (plain, name_was_encrypted) = match side {
            Some(side) => {
                let decoded = side.decode_listed(&disk_rel, entry.path());
                (decoded.plain, decoded.was_encrypted)
            }
            None => (disk_rel.clone(), false),
        };
        if ignore.is_match(&disk_rel) || ignore.is_match(&plain) {
            trace!("Ignoring {}", disk_rel);
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|e| Error::access(entry.path(), e.to_string()))?;
        let data = FileData {
            relative_path: plain,
            disk_path: disk_rel,
            last_write_time: effective_mtime(&metadata),
            name_was_encrypted,
            size: metadata.len(),
        };
        if let Some(replaced) = snapshot.insert(data.key(), data) {
            warn!(
                "{} and another file map to the same name, using the later one",
                replaced.disk_path
            );
        }
    }

    Ok(snapshot)
}

/// Snapshot entry for a single file, `None` when it does not exist
///
/// Directories and other non-files also give `None`.
pub fn stat_file(
    root: &Path,
    plain_rel: &str,
    disk_rel: &str,
    name_was_encrypted: bool,
) -> Result<Option<FileData>> {
    let path = root.join(disk_rel);
    let metadata = match std::fs::symlink_metadata(&path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::access(path, e.to_string())),
    };
    if !metadata.is_file() {
        return Ok(None);
    }
    Ok(Some(FileData {
        relative_path: canonical_relative(plain_rel),
        disk_path: canonical_relative(disk_rel),
        last_write_time: effective_mtime(&metadata),
        name_was_encrypted,
        size: metadata.len(),
    }))
}
