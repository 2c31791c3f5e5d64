//! Core data types for CryptSync
//!
//! This module provides the fundamental data types shared by the codec, the
//! engine and the CLI: sync directions, per-file snapshots, case-insensitive
//! path keys, exit-code flags and pass statistics.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use filetime::FileTime;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{BitOr, BitOrAssign};
use std::path::Path;

/// Which way changes are allowed to flow for a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SyncDirection {
    /// Original and encrypted folders both propagate changes
    #[default]
    BothWays,
    /// Only the original folder propagates to the encrypted folder
    SrcToDst,
    /// Only the encrypted folder propagates to the original folder
    DstToSrc,
}

impl SyncDirection {
    /// All directions, used by exhaustive decision tests
    pub const ALL: [Self; 3] = [Self::BothWays, Self::SrcToDst, Self::DstToSrc];

    /// Whether original-side changes may be written to the encrypted folder
    pub const fn allows_src_to_dst(self) -> bool {
        matches!(self, Self::BothWays | Self::SrcToDst)
    }

    /// Whether encrypted-side changes may be written to the original folder
    pub const fn allows_dst_to_src(self) -> bool {
        matches!(self, Self::BothWays | Self::DstToSrc)
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BothWays => "both ways",
            Self::SrcToDst => "original to encrypted",
            Self::DstToSrc => "encrypted to original",
        };
        f.write_str(name)
    }
}

/// Operation that failed for a recorded path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FailureKind {
    /// Encrypting original to encrypted failed
    Encrypt,
    /// Decrypting encrypted to original failed
    Decrypt,
    /// A copy-only transfer failed
    Copy,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::Copy => "copy",
        };
        f.write_str(name)
    }
}

/// Bitmask returned by a sync pass and used as the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SyncErrorFlags(u32);

impl SyncErrorFlags {
    /// The pass was cancelled
    pub const CANCELLED: Self = Self(1);
    /// A configured root was inaccessible
    pub const ACCESS_DENIED: Self = Self(2);
    /// At least one encrypt or decrypt failed
    pub const CRYPTO_ERROR: Self = Self(4);
    /// At least one copy-only transfer failed
    pub const COPY_ERROR: Self = Self(8);

    /// No error bits set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build flags from raw bits, dropping unknown bits
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & 0b1111)
    }

    /// Raw bit value
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether no bit is set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every bit of `other` is set in `self`
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl BitOr for SyncErrorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SyncErrorFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for SyncErrorFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("ok");
        }
        let mut names = Vec::new();
        if self.contains(Self::CANCELLED) {
            names.push("cancelled");
        }
        if self.contains(Self::ACCESS_DENIED) {
            names.push("access denied");
        }
        if self.contains(Self::CRYPTO_ERROR) {
            names.push("crypto error");
        }
        if self.contains(Self::COPY_ERROR) {
            names.push("copy error");
        }
        f.write_str(&names.join(", "))
    }
}

/// Convert a relative path to the canonical `/`-separated form
pub fn canonical_relative(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}

fn folded_path(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/").to_lowercase();
    let trimmed = text.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Whether `candidate` equals `root` or lies below it
///
/// Comparison is case-insensitive and respects segment boundaries, so
/// `/data/a` does not contain `/data/ab`.
pub fn path_is_within(root: &Path, candidate: &Path) -> bool {
    let root = folded_path(root);
    let candidate = folded_path(candidate);
    if candidate == root {
        return true;
    }
    if root.ends_with('/') {
        return candidate.starts_with(&root);
    }
    candidate
        .strip_prefix(&root)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Relative path key that orders and compares case-insensitively
///
/// The original spelling is kept for display and for building on-disk paths.
#[derive(Debug, Clone)]
pub struct RelativeKey {
    display: String,
    folded: String,
}

impl RelativeKey {
    /// Create a key from a relative path in either separator style
    pub fn new(path: &str) -> Self {
        let display = canonical_relative(path);
        let folded = display.to_lowercase();
        Self { display, folded }
    }

    /// The path as it was spelled
    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// The case-folded form used for comparisons
    pub fn folded(&self) -> &str {
        &self.folded
    }
}

impl PartialEq for RelativeKey {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for RelativeKey {}

impl PartialOrd for RelativeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RelativeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded.cmp(&other.folded)
    }
}

impl Hash for RelativeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state);
    }
}

impl fmt::Display for RelativeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl From<&str> for RelativeKey {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Per-file metadata snapshot taken during enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileData {
    /// Canonical plaintext relative path (`/`-separated)
    pub relative_path: String,
    /// Relative path as stored on disk, possibly with an encrypted name
    pub disk_path: String,
    /// Modification time, or creation time when the write time is zero
    pub last_write_time: FileTime,
    /// Whether the on-disk name had to be decrypted
    pub name_was_encrypted: bool,
    /// File size in bytes
    pub size: u64,
}

impl FileData {
    /// Create a snapshot entry whose on-disk name equals its canonical name
    pub fn plain(relative_path: &str, last_write_time: FileTime, size: u64) -> Self {
        let relative_path = canonical_relative(relative_path);
        Self {
            disk_path: relative_path.clone(),
            relative_path,
            last_write_time,
            name_was_encrypted: false,
            size,
        }
    }

    /// Key used to join this entry with its counterpart
    pub fn key(&self) -> RelativeKey {
        RelativeKey::new(&self.relative_path)
    }
}

/// Counters for one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SyncStats {
    /// Files encrypted into the encrypted folder
    pub encrypted: u64,
    /// Files decrypted into the original folder
    pub decrypted: u64,
    /// Files copied verbatim
    pub copied: u64,
    /// Files deleted (trash or hard delete)
    pub deleted: u64,
    /// Paths that needed no action
    pub skipped: u64,
    /// Failed actions
    pub failed: u64,
    /// Pairs processed
    pub pairs: u64,
}

impl SyncStats {
    /// Create a new empty statistics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of content-changing actions performed
    pub fn actions(&self) -> u64 {
        self.encrypted + self.decrypted + self.copied + self.deleted
    }

    /// Merge statistics from another instance
    pub fn merge(&mut self, other: &SyncStats) {
        self.encrypted += other.encrypted;
        self.decrypted += other.decrypted;
        self.copied += other.copied;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.pairs += other.pairs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_relative_key_is_case_insensitive() {
        assert_eq!(RelativeKey::new("Docs/A.txt"), RelativeKey::new("docs\\a.TXT"));
        assert_eq!(RelativeKey::new("Docs/A.txt").as_str(), "Docs/A.txt");

        let mut map = BTreeMap::new();
        map.insert(RelativeKey::new("A.txt"), 1);
        map.insert(RelativeKey::new("a.txt"), 2);
        assert_eq!(map.len(), 1);
        assert_eq!(map[&RelativeKey::new("A.TXT")], 2);
    }

    #[test]
    fn test_path_is_within() {
        assert!(path_is_within(Path::new("/data/plain"), Path::new("/data/plain")));
        assert!(path_is_within(Path::new("/data/plain"), Path::new("/DATA/Plain/a.txt")));
        assert!(path_is_within(Path::new("/data/plain/"), Path::new("/data/plain/x")));
        assert!(!path_is_within(Path::new("/data/plain"), Path::new("/data/plainer/a.txt")));
        assert!(path_is_within(Path::new("C:\\Sync"), Path::new("c:/sync/doc.txt")));
        assert!(path_is_within(Path::new("/"), Path::new("/etc")));
    }

    #[test]
    fn test_canonical_relative() {
        assert_eq!(canonical_relative("\\dir\\sub\\f.txt"), "dir/sub/f.txt");
        assert_eq!(canonical_relative("dir/"), "dir");
    }

    #[test]
    fn test_direction_permissions() {
        assert!(SyncDirection::BothWays.allows_src_to_dst());
        assert!(SyncDirection::BothWays.allows_dst_to_src());
        assert!(SyncDirection::SrcToDst.allows_src_to_dst());
        assert!(!SyncDirection::SrcToDst.allows_dst_to_src());
        assert!(!SyncDirection::DstToSrc.allows_src_to_dst());
        assert!(SyncDirection::DstToSrc.allows_dst_to_src());
    }

    #[test]
    fn test_error_flags() {
        let mut flags = SyncErrorFlags::empty();
        assert!(flags.is_empty());
        assert_eq!(flags.to_string(), "ok");

        flags |= SyncErrorFlags::CRYPTO_ERROR;
        flags.insert(SyncErrorFlags::CANCELLED);
        assert_eq!(flags.bits(), 5);
        assert!(flags.contains(SyncErrorFlags::CANCELLED));
        assert!(!flags.contains(SyncErrorFlags::COPY_ERROR));
        assert_eq!(flags.to_string(), "cancelled, crypto error");
        assert_eq!(SyncErrorFlags::from_bits_truncate(0xff).bits(), 15);
    }
}
