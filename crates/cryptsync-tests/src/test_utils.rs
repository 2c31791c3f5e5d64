//! Fixtures shared by the integration tests

use cryptsync_codec::{ArchiveCodec, KdfParams};
use cryptsync_config::SyncPair;
use cryptsync_engine::{HardDelete, SyncContext};
use cryptsync_types::{
    CodecProgress, CompressionMode, ContentCodec, Error, ProgressAction, Result,
};
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Marker written in front of contents by [`RecordingCodec`]
pub const SEALED_PREFIX: &[u8] = b"SEALED:";

/// One call made to [`RecordingCodec`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecCall {
    /// `encrypt(source, ..)` with the requested mode
    Encrypt {
        /// Plaintext file
        source: PathBuf,
        /// Compression requested by the engine
        mode: CompressionMode,
    },
    /// `decrypt(archive, ..)`
    Decrypt {
        /// Container file
        archive: PathBuf,
    },
}

/// Content codec that records its calls
///
/// Encryption writes [`SEALED_PREFIX`] followed by the source bytes. A delay
/// is spent in small steps, polling the progress callback, so cancellation
/// can be observed mid-file.
#[derive(Debug, Default)]
pub struct RecordingCodec {
    calls: Mutex<Vec<CodecCall>>,
    delay: Duration,
    fail_encrypt: bool,
}

impl RecordingCodec {
    /// Codec that succeeds immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec that spends `delay` on every call
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Codec whose encryption writes partial output and then fails
    pub fn failing() -> Self {
        Self {
            fail_encrypt: true,
            ..Self::default()
        }
    }

    /// Calls made so far
    pub fn calls(&self) -> Vec<CodecCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Modes of the encrypt calls made so far
    pub fn encrypt_modes(&self) -> Vec<CompressionMode> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                CodecCall::Encrypt { mode, .. } => Some(mode),
                CodecCall::Decrypt { .. } => None,
            })
            .collect()
    }

    fn record(&self, call: CodecCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn pause(
        &self,
        item: &Path,
        progress: &dyn Fn(&CodecProgress<'_>) -> ProgressAction,
    ) -> Result<()> {
        let started = Instant::now();
        loop {
            let report = CodecProgress {
                processed: 0,
                total: 0,
                current_item: item,
            };
            if progress(&report) == ProgressAction::Abort {
                return Err(Error::Cancelled);
            }
            if started.elapsed() >= self.delay {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl ContentCodec for RecordingCodec {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn encrypt(
        &self,
        source: &Path,
        archive: &Path,
        _password: &str,
        mode: CompressionMode,
        progress: &dyn Fn(&CodecProgress<'_>) -> ProgressAction,
    ) -> Result<()> {
        self.record(CodecCall::Encrypt {
            source: source.to_path_buf(),
            mode,
        });
        self.pause(source, progress)?;

        if self.fail_encrypt {
            fs::write(archive, b"partial")?;
            return Err(Error::crypto(source, "simulated codec failure"));
        }
        let mut sealed = SEALED_PREFIX.to_vec();
        sealed.extend(fs::read(source)?);
        fs::write(archive, sealed)?;
        Ok(())
    }

    fn decrypt(
        &self,
        archive: &Path,
        destination: &Path,
        _password: &str,
        progress: &dyn Fn(&CodecProgress<'_>) -> ProgressAction,
    ) -> Result<()> {
        self.record(CodecCall::Decrypt {
            archive: archive.to_path_buf(),
        });
        self.pause(archive, progress)?;

        let data = fs::read(archive)?;
        let plain = data
            .strip_prefix(SEALED_PREFIX)
            .ok_or_else(|| Error::crypto(archive, "not a sealed file"))?;
        fs::write(destination, plain)?;
        Ok(())
    }

    fn is_foreign(&self, file: &Path) -> bool {
        fs::read(file).is_ok_and(|data| !data.starts_with(SEALED_PREFIX))
    }
}

/// Archive codec with a cheap key derivation
pub fn fast_archive_codec() -> Arc<ArchiveCodec> {
    Arc::new(ArchiveCodec::with_kdf(KdfParams {
        memory_kib: 64,
        iterations: 1,
    }))
}

/// Temporary original and encrypted folders
#[derive(Debug)]
pub struct PairFixture {
    dir: TempDir,
    /// Plaintext root, created empty
    pub original: PathBuf,
    /// Encrypted root, not created
    pub encrypted: PathBuf,
}

impl PairFixture {
    /// Fresh fixture with an empty original folder
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let original = dir.path().join("plain");
        let encrypted = dir.path().join("crypt");
        fs::create_dir_all(&original).expect("Failed to create original root");
        Self {
            dir,
            original,
            encrypted,
        }
    }

    /// Scratch directory outside both roots
    pub fn scratch(&self) -> &Path {
        self.dir.path()
    }

    /// Enabled pair over both roots with default options
    pub fn pair(&self, password: &str) -> SyncPair {
        SyncPair::new(&self.original, &self.encrypted, password)
    }

    /// Context for `pairs` using `codec` for both container formats
    pub fn context(&self, pairs: Vec<SyncPair>, codec: Arc<dyn ContentCodec>) -> Arc<SyncContext> {
        Arc::new(
            SyncContext::new(pairs, "")
                .with_archive_codec(Arc::clone(&codec))
                .with_gpg_codec(codec)
                .with_soft_delete(Arc::new(HardDelete)),
        )
    }
}

impl Default for PairFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `contents` to `root/rel` and stamp it with `secs` since the epoch
pub fn write_file(root: &Path, rel: &str, contents: &str, secs: i64) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(&path, contents).expect("Failed to write test file");
    filetime::set_file_mtime(&path, FileTime::from_unix_time(secs, 0))
        .expect("Failed to set mtime");
    path
}

/// Modification time of `path` in whole seconds
pub fn mtime_secs(path: &Path) -> i64 {
    let metadata = fs::metadata(path).expect("Failed to stat file");
    FileTime::from_last_modification_time(&metadata).unix_seconds()
}

/// Files below `root` as sorted `/`-separated relative paths
pub fn list_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let rel = entry.path().strip_prefix(root).ok()?;
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            Some(parts.join("/"))
        })
        .collect();
    files.sort();
    files
}
