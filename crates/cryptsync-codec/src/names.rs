//! Reversible obfuscation of relative paths
//!
//! Each path segment is prefixed with a `*` sentinel, encrypted with a
//! ChaCha20 keystream derived from the pair password and written in one of
//! the [`NameScheme`] text encodings. The container suffix is appended to
//! the whole path. Decoding never fails: a segment that does not decode is
//! kept as it is, which is how foreign files dropped into the encrypted
//! folder are recognized. A segment must decrypt to the sentinel followed by
//! at least one byte.

use crate::encoding::{CompactEncoding, HexEncoding, NameTextEncoding};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use cryptsync_types::canonical_relative;
use sha2::{Digest, Sha256};
use std::fmt;

/// Marks a segment as produced by this codec
const SENTINEL: u8 = b'*';

/// Suffix of archive containers
pub const ARCHIVE_SUFFIX: &str = ".7z";
/// Suffix of GPG containers
pub const GPG_SUFFIX: &str = ".gpg";
/// Suffix of native containers when the archive suffix is off
pub const NATIVE_SUFFIX: &str = ".cryptsync";

/// Text encoding used for encrypted segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameScheme {
    /// Upper-case hexadecimal
    #[default]
    LegacyHex,
    /// 13 bits per CJK/Hangul code point
    Compact,
}

impl NameScheme {
    /// Scheme for a pair's `encrypt_names_new_scheme` flag
    pub const fn from_new_scheme_flag(new_scheme: bool) -> Self {
        if new_scheme {
            Self::Compact
        } else {
            Self::LegacyHex
        }
    }
}

/// Options for a [`FilenameCodec`]
#[derive(Clone, Default)]
pub struct NameOptions {
    /// Pair password
    pub password: String,
    /// Whether segments are encrypted
    pub encrypt_names: bool,
    /// Text encoding for new names
    pub scheme: NameScheme,
    /// `.7z` suffix
    pub use_archive_format: bool,
    /// `.gpg` suffix when the archive suffix is off
    pub use_gpg: bool,
}

impl fmt::Debug for NameOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameOptions")
            .field("encrypt_names", &self.encrypt_names)
            .field("scheme", &self.scheme)
            .field("use_archive_format", &self.use_archive_format)
            .field("use_gpg", &self.use_gpg)
            .finish_non_exhaustive()
    }
}

/// Result of decoding an on-disk relative path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedName {
    /// Canonical plaintext relative path
    pub plain: String,
    /// Whether the on-disk name differed from the plaintext name
    pub was_encrypted: bool,
}

/// Maps plaintext relative paths to encrypted-folder names and back
#[derive(Clone)]
pub struct FilenameCodec {
    key: [u8; 32],
    nonce: [u8; 12],
    encrypt_names: bool,
    scheme: NameScheme,
    suffix: &'static str,
}

impl fmt::Debug for FilenameCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilenameCodec")
            .field("encrypt_names", &self.encrypt_names)
            .field("scheme", &self.scheme)
            .field("suffix", &self.suffix)
            .finish_non_exhaustive()
    }
}

impl FilenameCodec {
    /// Create a codec; keys are derived from the password once
    pub fn new(options: &NameOptions) -> Self {
        let key: [u8; 32] = Sha256::digest(options.password.as_bytes()).into();

        let mut hasher = Sha256::new();
        hasher.update(b"cryptsync name nonce\0");
        hasher.update(options.password.as_bytes());
        let digest = hasher.finalize();
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&digest[..12]);

        let suffix = if options.use_archive_format {
            ARCHIVE_SUFFIX
        } else if options.use_gpg {
            GPG_SUFFIX
        } else {
            NATIVE_SUFFIX
        };

        Self {
            key,
            nonce,
            encrypt_names: options.encrypt_names,
            scheme: options.scheme,
            suffix,
        }
    }

    /// Container suffix appended to every encoded path
    pub fn suffix(&self) -> &'static str {
        self.suffix
    }

    /// Whether segments are encrypted
    pub fn encrypts_names(&self) -> bool {
        self.encrypt_names
    }

    /// On-disk relative path for a plaintext relative path
    pub fn encode(&self, plain_rel: &str) -> String {
        let canonical = canonical_relative(plain_rel);
        let body = if self.encrypt_names {
            canonical
                .split('/')
                .map(|segment| self.encrypt_segment(segment))
                .collect::<Vec<_>>()
                .join("/")
        } else {
            canonical
        };
        format!("{}{}", body, self.suffix)
    }

    /// Plaintext relative path for an on-disk relative path
    pub fn decode(&self, disk_rel: &str) -> DecodedName {
        self.decode_path(disk_rel, None::<fn() -> bool>)
    }

    /// Like [`decode`](Self::decode), for names found while listing a folder
    ///
    /// With the archive suffix, a `.7z` file whose stem does not decrypt and
    /// for which `is_foreign` answers `true` is the user's own archive and
    /// keeps its full name. `is_foreign` is only called for such files.
    pub fn decode_listed(&self, disk_rel: &str, is_foreign: impl FnOnce() -> bool) -> DecodedName {
        let foreign_check = self.suffix == ARCHIVE_SUFFIX;
        self.decode_path(disk_rel, foreign_check.then_some(is_foreign))
    }

    fn decode_path<F>(&self, disk_rel: &str, foreign_check: Option<F>) -> DecodedName
    where
        F: FnOnce() -> bool,
    {
        let canonical = canonical_relative(disk_rel);
        let (body, suffix_text) = split_suffix(&canonical, self.suffix);

        let mut plain_segments: Vec<String> = Vec::new();
        let mut last_decrypted = false;
        for segment in body.split('/') {
            match self.decrypt_segment(segment) {
                Some(plain) => {
                    plain_segments.push(plain);
                    last_decrypted = true;
                }
                None => {
                    plain_segments.push(segment.to_string());
                    last_decrypted = false;
                }
            }
        }

        if let (Some(suffix_text), Some(is_foreign)) = (suffix_text, foreign_check) {
            if !last_decrypted && is_foreign() {
                if let Some(last) = plain_segments.last_mut() {
                    last.push_str(suffix_text);
                }
            }
        }

        let plain = plain_segments.join("/");
        let was_encrypted = plain.to_lowercase() != canonical.to_lowercase();
        DecodedName {
            plain,
            was_encrypted,
        }
    }

    fn cipher(&self) -> ChaCha20 {
        ChaCha20::new(
            chacha20::Key::from_slice(&self.key),
            chacha20::Nonce::from_slice(&self.nonce),
        )
    }

    fn encrypt_segment(&self, segment: &str) -> String {
        let mut bytes = Vec::with_capacity(segment.len() + 1);
        bytes.push(SENTINEL);
        bytes.extend_from_slice(segment.as_bytes());
        self.cipher().apply_keystream(&mut bytes);
        match self.scheme {
            NameScheme::LegacyHex => HexEncoding.encode(&bytes),
            NameScheme::Compact => CompactEncoding::primary().encode(&bytes),
        }
    }

    fn decrypt_segment(&self, segment: &str) -> Option<String> {
        if !self.encrypt_names || segment.is_empty() {
            return None;
        }

        self.candidate_bytes(segment).into_iter().find_map(|mut bytes| {
            self.cipher().apply_keystream(&mut bytes);
            match bytes.split_first() {
                Some((&SENTINEL, rest)) if !rest.is_empty() => String::from_utf8(rest.to_vec()).ok(),
                _ => None,
            }
        })
    }

    /// Text decodings to try, configured scheme first
    fn candidate_bytes(&self, segment: &str) -> Vec<Vec<u8>> {
        let hex = || HexEncoding.decode(segment);
        let compact = || {
            CompactEncoding::primary()
                .decode(segment)
                .or_else(|| CompactEncoding::alternate().decode(segment))
        };
        let ordered = match self.scheme {
            NameScheme::LegacyHex => [hex(), compact()],
            NameScheme::Compact => [compact(), hex()],
        };
        ordered.into_iter().flatten().collect()
    }
}

/// Split a case-insensitive suffix off `text`
fn split_suffix<'a>(text: &'a str, suffix: &str) -> (&'a str, Option<&'a str>) {
    if text.len() > suffix.len() {
        let cut = text.len() - suffix.len();
        if text.is_char_boundary(cut) && text[cut..].eq_ignore_ascii_case(suffix) {
            return (&text[..cut], Some(&text[cut..]));
        }
    }
    (text, None)
}
