//! Filters, filename obfuscation and content codecs for CryptSync
//!
//! This crate contains everything that transforms names or bytes as they
//! cross between the original and the encrypted folder:
//!
//! - **Filters**: `|`-separated wildcard lists matched per path and per segment
//! - **Filename codec**: reversible, password-keyed name encryption with
//!   pluggable text encodings
//! - **Archive codec**: zstd compression sealed with ChaCha20-Poly1305 under
//!   an Argon2id key
//! - **GPG codec**: the external `gpg` tool in batch mode
//!
//! # Examples
//!
//! ```rust
//! use cryptsync_codec::{FilenameCodec, FilterSet, NameOptions, NameScheme};
//!
//! let ignore = FilterSet::parse("*.tmp*|thumbs.db");
//! assert!(ignore.is_match("photos/Thumbs.db"));
//!
//! let codec = FilenameCodec::new(&NameOptions {
//!     password: "secret".to_string(),
//!     encrypt_names: true,
//!     scheme: NameScheme::Compact,
//!     use_archive_format: true,
//!     use_gpg: false,
//! });
//! let disk = codec.encode("docs/plan.txt");
//! assert!(disk.ends_with(".7z"));
//! assert_eq!(codec.decode(&disk).plain, "docs/plan.txt");
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod archive;
pub mod encoding;
pub mod filter;
pub mod gpg;
pub mod names;

pub use archive::{
    ArchiveCodec, KdfParams, CHUNK_SIZE, MAX_KDF_ITERATIONS, MAX_KDF_MEMORY_KIB,
};
pub use encoding::{CompactEncoding, HexEncoding, NameTextEncoding};
pub use filter::{wildcard_to_glob, FilterSet};
pub use gpg::GpgCodec;
pub use names::{
    DecodedName, FilenameCodec, NameOptions, NameScheme, ARCHIVE_SUFFIX, GPG_SUFFIX,
    NATIVE_SUFFIX,
};
