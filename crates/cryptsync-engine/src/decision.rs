//! Per-path sync decisions
//!
//! [`decide`] is a pure function of the two snapshot entries for one path
//! and the pair's policy. Filters are applied before the direction table.

use cryptsync_codec::FilterSet;
use cryptsync_config::SyncPair;
use cryptsync_types::{compare_time, CompressionMode, FailureKind, FileData, SyncDirection};
use std::cmp::Ordering;
use std::fmt;

/// Everything [`decide`] needs to know about a pair
#[derive(Debug, Clone)]
pub struct PairPolicy {
    /// Which way changes flow
    pub direction: SyncDirection,
    /// Propagate deletions
    pub sync_deletions: bool,
    /// Compare timestamps with FAT tolerance
    pub fat_time_tolerance: bool,
    /// Clear the archive attribute of up-to-date originals
    pub reset_archive_attribute: bool,
    /// Files larger than this are stored without compression
    pub compress_size_limit: u64,
    /// Process-wide ignore list
    pub ignore: FilterSet,
    /// Pair's never-sync list
    pub no_sync: FilterSet,
    /// Pair's encrypt-without-compression list
    pub crypt_only: FilterSet,
    /// Pair's verbatim-copy list
    pub copy_only: FilterSet,
}

impl PairPolicy {
    /// Policy for `pair` under the global ignore list
    pub fn from_pair(pair: &SyncPair, ignore: &FilterSet) -> Self {
        Self {
            direction: pair.sync_direction,
            sync_deletions: pair.sync_deletions,
            fat_time_tolerance: pair.fat_time_tolerance,
            reset_archive_attribute: pair.reset_archive_attribute_on_success,
            compress_size_limit: pair.compress_size_limit_bytes(),
            ignore: ignore.clone(),
            no_sync: FilterSet::parse(&pair.filters.no_sync),
            crypt_only: FilterSet::parse(&pair.filters.crypt_only),
            copy_only: FilterSet::parse(&pair.filters.copy_only),
        }
    }

    /// Whether `relative` is excluded from syncing
    pub fn is_filtered(&self, relative: &str) -> bool {
        self.ignore.is_match(relative) || self.no_sync.is_match(relative)
    }

    /// Whether `relative` is copied verbatim
    pub fn is_copy_only(&self, relative: &str) -> bool {
        self.copy_only.is_match(relative)
    }

    /// Compression for an original file
    pub fn compression_for(&self, relative: &str, size: u64) -> CompressionMode {
        if self.crypt_only.is_match(relative) || size > self.compress_size_limit {
            CompressionMode::Store
        } else {
            CompressionMode::Compress
        }
    }
}

impl Default for PairPolicy {
    fn default() -> Self {
        Self {
            direction: SyncDirection::BothWays,
            sync_deletions: false,
            fat_time_tolerance: false,
            reset_archive_attribute: false,
            compress_size_limit: u64::MAX,
            ignore: FilterSet::empty(),
            no_sync: FilterSet::empty(),
            crypt_only: FilterSet::empty(),
            copy_only: FilterSet::empty(),
        }
    }
}

/// Why nothing is done for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Matched the ignore or no-sync list
    Filtered,
    /// One side is missing and deletions are not propagated
    DeletionNotSynced,
    /// The newer side may not be written to the other one
    DirectionBlocked,
    /// Both sides are current
    UpToDate,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Filtered => "filtered",
            Self::DeletionNotSynced => "deletions are not synchronized",
            Self::DirectionBlocked => "blocked by sync direction",
            Self::UpToDate => "up to date",
        };
        f.write_str(text)
    }
}

/// Action for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Encrypt the original into the encrypted folder
    Encrypt {
        /// Whether to compress first
        mode: CompressionMode,
    },
    /// Decrypt the encrypted file into the original folder
    Decrypt,
    /// Copy the original verbatim into the encrypted folder
    CopyToEncrypted,
    /// Copy the encrypted-folder file verbatim into the original folder
    CopyToOriginal,
    /// Delete the original file
    DeleteOriginal,
    /// Delete the encrypted file
    DeleteEncrypted,
    /// Clear the archive attribute of the original
    ClearArchiveAttribute,
    /// Do nothing
    Skip(SkipReason),
}

impl Decision {
    /// Whether files are written or removed
    pub const fn changes_files(self) -> bool {
        !matches!(self, Self::Skip(_) | Self::ClearArchiveAttribute)
    }

    /// Failure record kind for a failed action
    pub const fn failure_kind(self) -> Option<FailureKind> {
        match self {
            Self::Encrypt { .. } => Some(FailureKind::Encrypt),
            Self::Decrypt => Some(FailureKind::Decrypt),
            Self::CopyToEncrypted | Self::CopyToOriginal => Some(FailureKind::Copy),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encrypt {
                mode: CompressionMode::Compress,
            } => f.write_str("encrypt"),
            Self::Encrypt {
                mode: CompressionMode::Store,
            } => f.write_str("encrypt (store)"),
            Self::Decrypt => f.write_str("decrypt"),
            Self::CopyToEncrypted => f.write_str("copy to encrypted folder"),
            Self::CopyToOriginal => f.write_str("copy to original folder"),
            Self::DeleteOriginal => f.write_str("delete original"),
            Self::DeleteEncrypted => f.write_str("delete encrypted"),
            Self::ClearArchiveAttribute => f.write_str("clear archive attribute"),
            Self::Skip(reason) => write!(f, "skip ({})", reason),
        }
    }
}

fn to_encrypted(orig: &FileData, policy: &PairPolicy, copy: bool) -> Decision {
    if copy {
        Decision::CopyToEncrypted
    } else {
        Decision::Encrypt {
            mode: policy.compression_for(&orig.relative_path, orig.size),
        }
    }
}

const fn to_original(copy: bool) -> Decision {
    if copy {
        Decision::CopyToOriginal
    } else {
        Decision::Decrypt
    }
}

/// Decide what to do with one path
///
/// `orig` and `crypt` are the entries of the two snapshots for the same
/// plaintext path. For `BothWays` the original folder wins when only one
/// side has the file: a new original is encrypted and a lone encrypted file
/// is removed or left alone, depending on `sync_deletions`.
pub fn decide(orig: Option<&FileData>, crypt: Option<&FileData>, policy: &PairPolicy) -> Decision {
    let Some(relative) = orig.or(crypt).map(|data| data.relative_path.as_str()) else {
        return Decision::Skip(SkipReason::UpToDate);
    };
    if policy.is_filtered(relative) {
        return Decision::Skip(SkipReason::Filtered);
    }
    let copy = policy.is_copy_only(relative);
    let direction = policy.direction;

    match (orig, crypt) {
        (None, None) => Decision::Skip(SkipReason::UpToDate),
        (None, Some(_)) => match direction {
            SyncDirection::DstToSrc => to_original(copy),
            SyncDirection::BothWays | SyncDirection::SrcToDst => {
                if policy.sync_deletions {
                    Decision::DeleteEncrypted
                } else {
                    Decision::Skip(SkipReason::DeletionNotSynced)
                }
            }
        },
        (Some(orig), None) => match direction {
            SyncDirection::DstToSrc => {
                if policy.sync_deletions {
                    Decision::DeleteOriginal
                } else {
                    Decision::Skip(SkipReason::DeletionNotSynced)
                }
            }
            SyncDirection::BothWays | SyncDirection::SrcToDst => to_encrypted(orig, policy, copy),
        },
        (Some(orig), Some(crypt)) => {
            match compare_time(
                orig.last_write_time,
                crypt.last_write_time,
                policy.fat_time_tolerance,
            ) {
                Ordering::Less if direction.allows_dst_to_src() => to_original(copy),
                Ordering::Greater if direction.allows_src_to_dst() => {
                    to_encrypted(orig, policy, copy)
                }
                Ordering::Less | Ordering::Greater => Decision::Skip(SkipReason::DirectionBlocked),
                Ordering::Equal => {
                    if policy.reset_archive_attribute && direction.allows_src_to_dst() {
                        Decision::ClearArchiveAttribute
                    } else {
                        Decision::Skip(SkipReason::UpToDate)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use proptest::prelude::*;
    use rstest::rstest;

    const COMPRESS: Decision = Decision::Encrypt {
        mode: CompressionMode::Compress,
    };
    const STORE: Decision = Decision::Encrypt {
        mode: CompressionMode::Store,
    };

    fn file(rel: &str, secs: i64) -> FileData {
        FileData::plain(rel, FileTime::from_unix_time(secs, 0), 10)
    }

    fn policy(direction: SyncDirection, sync_deletions: bool) -> PairPolicy {
        PairPolicy {
            direction,
            sync_deletions,
            ..PairPolicy::default()
        }
    }

    #[rstest]
    #[case(SyncDirection::BothWays, false, Decision::Skip(SkipReason::DeletionNotSynced))]
    #[case(SyncDirection::BothWays, true, Decision::DeleteEncrypted)]
    #[case(SyncDirection::SrcToDst, false, Decision::Skip(SkipReason::DeletionNotSynced))]
    #[case(SyncDirection::SrcToDst, true, Decision::DeleteEncrypted)]
    #[case(SyncDirection::DstToSrc, false, Decision::Decrypt)]
    #[case(SyncDirection::DstToSrc, true, Decision::Decrypt)]
    fn test_only_encrypted_present(
        #[case] direction: SyncDirection,
        #[case] sync_deletions: bool,
        #[case] expected: Decision,
    ) {
        let crypt = file("a.txt", 100);
        assert_eq!(decide(None, Some(&crypt), &policy(direction, sync_deletions)), expected);
    }

    #[rstest]
    #[case(SyncDirection::BothWays, false, COMPRESS)]
    #[case(SyncDirection::BothWays, true, COMPRESS)]
    #[case(SyncDirection::SrcToDst, false, COMPRESS)]
    #[case(SyncDirection::SrcToDst, true, COMPRESS)]
    #[case(SyncDirection::DstToSrc, false, Decision::Skip(SkipReason::DeletionNotSynced))]
    #[case(SyncDirection::DstToSrc, true, Decision::DeleteOriginal)]
    fn test_only_original_present(
        #[case] direction: SyncDirection,
        #[case] sync_deletions: bool,
        #[case] expected: Decision,
    ) {
        let orig = file("a.txt", 100);
        assert_eq!(decide(Some(&orig), None, &policy(direction, sync_deletions)), expected);
    }

    #[rstest]
    #[case(SyncDirection::BothWays, 100, 200, Decision::Decrypt)]
    #[case(SyncDirection::DstToSrc, 100, 200, Decision::Decrypt)]
    #[case(SyncDirection::SrcToDst, 100, 200, Decision::Skip(SkipReason::DirectionBlocked))]
    #[case(SyncDirection::BothWays, 200, 100, COMPRESS)]
    #[case(SyncDirection::SrcToDst, 200, 100, COMPRESS)]
    #[case(SyncDirection::DstToSrc, 200, 100, Decision::Skip(SkipReason::DirectionBlocked))]
    #[case(SyncDirection::BothWays, 100, 100, Decision::Skip(SkipReason::UpToDate))]
    #[case(SyncDirection::SrcToDst, 100, 100, Decision::Skip(SkipReason::UpToDate))]
    #[case(SyncDirection::DstToSrc, 100, 100, Decision::Skip(SkipReason::UpToDate))]
    fn test_both_present(
        #[case] direction: SyncDirection,
        #[case] orig_secs: i64,
        #[case] crypt_secs: i64,
        #[case] expected: Decision,
    ) {
        for sync_deletions in [false, true] {
            let orig = file("a.txt", orig_secs);
            let crypt = file("a.txt", crypt_secs);
            assert_eq!(
                decide(Some(&orig), Some(&crypt), &policy(direction, sync_deletions)),
                expected
            );
        }
    }

    #[test]
    fn test_every_cell_has_one_decision() {
        for direction in SyncDirection::ALL {
            for sync_deletions in [false, true] {
                for (orig_present, crypt_present) in [(true, false), (false, true), (true, true)] {
                    let orig = file("x.txt", 10);
                    let crypt = file("x.txt", 10);
                    let decision = decide(
                        orig_present.then_some(&orig),
                        crypt_present.then_some(&crypt),
                        &policy(direction, sync_deletions),
                    );
                    if !orig_present {
                        assert_ne!(decision, COMPRESS);
                    }
                    if !crypt_present {
                        assert_ne!(decision, Decision::Decrypt);
                    }
                }
            }
        }
    }

    #[rstest]
    #[case(SyncDirection::BothWays, Decision::ClearArchiveAttribute)]
    #[case(SyncDirection::SrcToDst, Decision::ClearArchiveAttribute)]
    #[case(SyncDirection::DstToSrc, Decision::Skip(SkipReason::UpToDate))]
    fn test_archive_attribute_reset(#[case] direction: SyncDirection, #[case] expected: Decision) {
        let policy = PairPolicy {
            direction,
            reset_archive_attribute: true,
            ..PairPolicy::default()
        };
        let orig = file("a.txt", 100);
        let crypt = file("a.txt", 100);
        assert_eq!(decide(Some(&orig), Some(&crypt), &policy), expected);
    }

    #[test]
    fn test_fat_tolerance() {
        let mut policy = policy(SyncDirection::BothWays, false);
        let orig = file("a.txt", 1_700_000_001);
        let crypt = file("a.txt", 1_700_000_000);
        assert_eq!(decide(Some(&orig), Some(&crypt), &policy), COMPRESS);
        policy.fat_time_tolerance = true;
        assert_eq!(
            decide(Some(&orig), Some(&crypt), &policy),
            Decision::Skip(SkipReason::UpToDate)
        );
    }

    #[test]
    fn test_filters_come_first() {
        let policy = PairPolicy {
            sync_deletions: true,
            ignore: FilterSet::parse("*.tmp*"),
            no_sync: FilterSet::parse("private"),
            ..PairPolicy::default()
        };
        let tmp = file("work/a.tmp", 100);
        let private = file("Private/key.txt", 100);
        assert_eq!(
            decide(Some(&tmp), None, &policy),
            Decision::Skip(SkipReason::Filtered)
        );
        assert_eq!(
            decide(None, Some(&private), &policy),
            Decision::Skip(SkipReason::Filtered)
        );
    }

    #[test]
    fn test_copy_only_replaces_crypto() {
        let policy = PairPolicy {
            copy_only: FilterSet::parse("readme.txt"),
            direction: SyncDirection::BothWays,
            ..PairPolicy::default()
        };
        let new = file("docs/README.txt", 200);
        let old = file("docs/README.txt", 100);
        assert_eq!(decide(Some(&new), None, &policy), Decision::CopyToEncrypted);
        assert_eq!(decide(Some(&new), Some(&old), &policy), Decision::CopyToEncrypted);
        assert_eq!(decide(Some(&old), Some(&new), &policy), Decision::CopyToOriginal);
    }

    #[test]
    fn test_store_for_crypt_only_and_large_files() {
        let policy = PairPolicy {
            crypt_only: FilterSet::parse("*.jpg"),
            compress_size_limit: 5,
            ..PairPolicy::default()
        };
        let photo = FileData::plain("photo.JPG", FileTime::from_unix_time(1, 0), 1);
        let big = FileData::plain("big.bin", FileTime::from_unix_time(1, 0), 6);
        let small = FileData::plain("small.bin", FileTime::from_unix_time(1, 0), 5);
        assert_eq!(decide(Some(&photo), None, &policy), STORE);
        assert_eq!(decide(Some(&big), None, &policy), STORE);
        assert_eq!(decide(Some(&small), None, &policy), COMPRESS);
    }

    #[test]
    fn test_from_pair() {
        let mut pair = SyncPair::new("/a", "/b", "pw");
        pair.compress_size_limit_mb = 1;
        pair.filters.copy_only = "*.md".to_string();
        let policy = PairPolicy::from_pair(&pair, &FilterSet::parse("*.bak"));
        assert_eq!(policy.compress_size_limit, 1024 * 1024);
        assert!(policy.is_copy_only("x/Notes.MD"));
        assert!(policy.is_filtered("old.bak"));
    }

    #[test]
    fn test_display() {
        assert_eq!(STORE.to_string(), "encrypt (store)");
        assert_eq!(
            Decision::Skip(SkipReason::UpToDate).to_string(),
            "skip (up to date)"
        );
        assert_eq!(Decision::Decrypt.failure_kind(), Some(FailureKind::Decrypt));
        assert!(!Decision::ClearArchiveAttribute.changes_files());
    }

    proptest! {
        #[test]
        fn prop_swapping_times_swaps_the_direction(
            a in 0i64..4_000_000_000,
            b in 0i64..4_000_000_000,
            fat in any::<bool>(),
        ) {
            let policy = PairPolicy {
                fat_time_tolerance: fat,
                ..PairPolicy::default()
            };
            let forward = decide(Some(&file("a.txt", a)), Some(&file("a.txt", b)), &policy);
            let backward = decide(Some(&file("a.txt", b)), Some(&file("a.txt", a)), &policy);
            let mirrored = match forward {
                COMPRESS => Decision::Decrypt,
                Decision::Decrypt => COMPRESS,
                other => other,
            };
            prop_assert_eq!(backward, mirrored);
        }
    }
}
