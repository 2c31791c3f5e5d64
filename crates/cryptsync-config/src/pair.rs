//! Sync pair records and their validation

use crate::{ConfigError, ConfigResult, ProtectedPassword};
use cryptsync_types::{path_is_within, SyncDirection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default size above which files are stored without compression
pub const DEFAULT_COMPRESS_SIZE_LIMIT_MB: u64 = 100;

/// Per-pair filter lists, each a `|`-separated list of wildcard patterns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairFilters {
    /// Files never synchronized
    #[serde(default)]
    pub no_sync: String,
    /// Files encrypted without compression
    #[serde(default)]
    pub crypt_only: String,
    /// Files copied verbatim, neither compressed nor encrypted
    #[serde(default)]
    pub copy_only: String,
}

/// One configured original/encrypted folder pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPair {
    /// Whether the pair takes part in sync passes
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Plaintext folder
    pub original_path: PathBuf,
    /// Encrypted mirror folder
    pub encrypted_path: PathBuf,
    /// Content and name password, may be empty
    #[serde(default)]
    pub password: ProtectedPassword,
    /// Encrypt file and folder names
    #[serde(default)]
    pub encrypt_names: bool,
    /// Use the compact name encoding instead of hex
    #[serde(default)]
    pub encrypt_names_new_scheme: bool,
    /// Which way changes flow
    #[serde(default)]
    pub sync_direction: SyncDirection,
    /// Use the `.7z` suffix for archive containers
    #[serde(default = "default_true")]
    pub use_archive_format: bool,
    /// Use the external GPG tool (`.gpg` suffix)
    #[serde(default)]
    pub use_external_gpg: bool,
    /// Treat timestamps within the FAT tolerance as equal
    #[serde(default)]
    pub fat_time_tolerance: bool,
    /// Files above this size (MiB) are stored without compression
    #[serde(default = "default_compress_size_limit_mb")]
    pub compress_size_limit_mb: u64,
    /// Propagate deletions
    #[serde(default)]
    pub sync_deletions: bool,
    /// Clear the archive attribute of up-to-date originals
    #[serde(default)]
    pub reset_archive_attribute_on_success: bool,
    /// Filter lists
    #[serde(default)]
    pub filters: PairFilters,
}

fn default_true() -> bool {
    true
}

fn default_compress_size_limit_mb() -> u64 {
    DEFAULT_COMPRESS_SIZE_LIMIT_MB
}

impl SyncPair {
    /// Create an enabled pair with default options
    ///
    /// Both roots are normalized.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        original_path: P,
        encrypted_path: Q,
        password: &str,
    ) -> Self {
        Self {
            enabled: true,
            original_path: normalize_root(original_path.as_ref()),
            encrypted_path: normalize_root(encrypted_path.as_ref()),
            password: ProtectedPassword::new(password),
            encrypt_names: false,
            encrypt_names_new_scheme: false,
            sync_direction: SyncDirection::default(),
            use_archive_format: true,
            use_external_gpg: false,
            fat_time_tolerance: false,
            compress_size_limit_mb: DEFAULT_COMPRESS_SIZE_LIMIT_MB,
            sync_deletions: false,
            reset_archive_attribute_on_success: false,
            filters: PairFilters::default(),
        }
    }

    /// Whether contents go through the external GPG tool
    pub fn uses_gpg(&self) -> bool {
        self.use_external_gpg && !self.use_archive_format
    }

    /// Size above which compression is skipped, in bytes
    pub fn compress_size_limit_bytes(&self) -> u64 {
        self.compress_size_limit_mb.saturating_mul(1024 * 1024)
    }

    /// Whether `path` lies under either root of this pair
    pub fn owns(&self, path: &Path) -> bool {
        path_is_within(&self.original_path, path) || path_is_within(&self.encrypted_path, path)
    }

    /// Normalize both roots in place
    pub fn normalize(&mut self) {
        self.original_path = normalize_root(&self.original_path);
        self.encrypted_path = normalize_root(&self.encrypted_path);
    }

    /// Check the pair invariants
    pub fn validate(&self) -> ConfigResult<()> {
        if self.original_path.as_os_str().is_empty() {
            return Err(ConfigError::missing_required("original_path"));
        }
        if self.encrypted_path.as_os_str().is_empty() {
            return Err(ConfigError::missing_required("encrypted_path"));
        }

        let original = normalize_root(&self.original_path);
        let encrypted = normalize_root(&self.encrypted_path);
        if path_is_within(&original, &encrypted) && path_is_within(&encrypted, &original) {
            return Err(ConfigError::validation(format!(
                "original and encrypted folders are the same: {}",
                original.display()
            )));
        }
        if path_is_within(&original, &encrypted) || path_is_within(&encrypted, &original) {
            return Err(ConfigError::validation(format!(
                "folders must not be nested: {} and {}",
                original.display(),
                encrypted.display()
            )));
        }

        let password = self.password.expose();
        if password.contains('"') {
            return Err(ConfigError::invalid_value(
                "password",
                "must not contain a double quote",
            ));
        }
        if password.chars().any(char::is_control) {
            return Err(ConfigError::invalid_value(
                "password",
                "must not contain control characters",
            ));
        }
        if password.is_empty() && self.uses_gpg() {
            return Err(ConfigError::invalid_value(
                "password",
                "GPG encryption needs a password",
            ));
        }

        Ok(())
    }
}

/// Strip trailing separators unless the path is a root
pub fn normalize_root(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    let trimmed = text.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        return if text.is_empty() {
            PathBuf::new()
        } else {
            PathBuf::from(&text[..1])
        };
    }
    if trimmed.ends_with(':') {
        return PathBuf::from(format!("{}\\", trimmed));
    }
    PathBuf::from(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/data/plain/", "/data/plain")]
    #[case("/data/plain", "/data/plain")]
    #[case("/", "/")]
    #[case("C:\\", "C:\\")]
    #[case("D:\\Sync\\\\", "D:\\Sync")]
    #[case("", "")]
    fn test_normalize_root(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_root(Path::new(input)), PathBuf::from(expected));
    }

    #[test]
    fn test_valid_pair() {
        let pair = SyncPair::new("/data/plain", "/data/crypt", "pw");
        assert!(pair.validate().is_ok());
        assert!(pair.enabled);
        assert!(pair.use_archive_format);
    }

    #[test]
    fn test_identical_paths_rejected() {
        let pair = SyncPair::new("/data/plain", "/DATA/Plain/", "pw");
        let error = pair.validate().unwrap_err();
        assert!(error.to_string().contains("same"));
    }

    #[rstest]
    #[case("/data", "/data/crypt")]
    #[case("/data/plain/crypt", "/data/plain")]
    fn test_nested_paths_rejected(#[case] original: &str, #[case] encrypted: &str) {
        let pair = SyncPair::new(original, encrypted, "pw");
        let error = pair.validate().unwrap_err();
        assert!(error.to_string().contains("nested"));
    }

    #[test]
    fn test_sibling_with_common_prefix_allowed() {
        let pair = SyncPair::new("/data/a", "/data/ab", "pw");
        assert!(pair.validate().is_ok());
    }

    #[rstest]
    #[case("has\"quote")]
    #[case("tab\there")]
    #[case("line\nbreak")]
    fn test_bad_passwords_rejected(#[case] password: &str) {
        let pair = SyncPair::new("/a", "/b", password);
        assert!(matches!(
            pair.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_empty_password_needs_archive_codec() {
        let mut pair = SyncPair::new("/a", "/b", "");
        assert!(pair.validate().is_ok());

        pair.use_archive_format = false;
        pair.use_external_gpg = true;
        assert!(pair.uses_gpg());
        assert!(pair.validate().is_err());
    }

    #[test]
    fn test_missing_roots() {
        let pair = SyncPair::new("", "/b", "pw");
        assert!(matches!(
            pair.validate(),
            Err(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_owns() {
        let pair = SyncPair::new("/data/plain", "/data/crypt", "pw");
        assert!(pair.owns(Path::new("/data/plain/docs/a.txt")));
        assert!(pair.owns(Path::new("/Data/Crypt/x.7z")));
        assert!(!pair.owns(Path::new("/data/plainer/a.txt")));
    }

    #[test]
    fn test_compress_size_limit_bytes() {
        let mut pair = SyncPair::new("/a", "/b", "pw");
        pair.compress_size_limit_mb = 2;
        assert_eq!(pair.compress_size_limit_bytes(), 2 * 1024 * 1024);
    }
}
