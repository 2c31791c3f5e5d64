//! Applying decisions to the filesystem
//!
//! Every write goes through a temporary file in the destination folder that
//! is renamed over the target once complete, so an interrupted action never
//! leaves a truncated file under a real name. Targets are registered in the
//! notify-ignore set first so the change watcher does not act on them.

use crate::attributes::clear_archive_attribute;
use crate::context::SyncContext;
use crate::decision::Decision;
use crate::pair::name_codec;
use crate::scan::EncryptedSide;
use crate::trash::{delete_file, DeleteMethod, SoftDelete};
use cryptsync_codec::FilenameCodec;
use cryptsync_config::SyncPair;
use cryptsync_types::{
    CancelToken, CodecProgress, CompressionMode, ContentCodec, Error, FileData, ProgressAction,
    Result, RetryPolicy,
};
use filetime::FileTime;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use tracing::{debug, trace, warn};

const TEMP_PREFIX: &str = ".~cs";
const TEMP_SUFFIX: &str = ".tmp";

/// Executes decisions for one pair
#[derive(Debug)]
pub struct ActionExecutor {
    context: Arc<SyncContext>,
    pair: SyncPair,
    names: FilenameCodec,
    codec: Arc<dyn ContentCodec>,
    soft_delete: Arc<dyn SoftDelete>,
    cancel: CancelToken,
}

impl ActionExecutor {
    /// Executor for `pair`, aborting codec work once `cancel` fires
    pub fn new(context: Arc<SyncContext>, pair: SyncPair, cancel: CancelToken) -> Self {
        let names = name_codec(&pair);
        let codec = context.codec_for(&pair);
        let soft_delete = context.soft_delete();
        Self {
            context,
            pair,
            names,
            codec,
            soft_delete,
            cancel,
        }
    }

    /// Filename codec of the pair
    pub fn names(&self) -> &FilenameCodec {
        &self.names
    }

    /// Codecs for listing the pair's encrypted folder
    pub fn encrypted_side(&self) -> EncryptedSide<'_> {
        EncryptedSide {
            names: &self.names,
            content: self.codec.as_ref(),
        }
    }

    /// Absolute original-side path of a plaintext relative path
    ///
    /// Failure records are keyed by this path.
    pub fn original_path(&self, relative: &str) -> PathBuf {
        self.pair.original_path.join(relative)
    }

    /// Apply `decision`
    ///
    /// Returns whether anything changed on disk. A failed encrypt, decrypt or
    /// copy is recorded against the original path; success clears it.
    pub fn execute(
        &self,
        decision: Decision,
        orig: Option<&FileData>,
        crypt: Option<&FileData>,
    ) -> Result<bool> {
        let Some(relative) = orig.or(crypt).map(|data| data.relative_path.clone()) else {
            return Ok(false);
        };
        let record_path =
            self.original_path(orig.map_or(relative.as_str(), |o| o.disk_path.as_str()));

        let result = match (decision, orig, crypt) {
            (Decision::Encrypt { mode }, Some(orig), crypt) => {
                self.encrypt(orig, crypt, mode).map(|()| true)
            }
            (Decision::Decrypt, orig, Some(crypt)) => self.decrypt(orig, crypt).map(|()| true),
            (Decision::CopyToEncrypted, Some(orig), crypt) => {
                self.copy_to_encrypted(orig, crypt).map(|()| true)
            }
            (Decision::CopyToOriginal, orig, Some(crypt)) => {
                self.copy_to_original(orig, crypt).map(|()| true)
            }
            (Decision::DeleteOriginal, Some(orig), _) => self
                .delete(&self.pair.original_path.join(&orig.disk_path))
                .map(|()| true),
            (Decision::DeleteEncrypted, _, Some(crypt)) => self
                .delete(&self.pair.encrypted_path.join(&crypt.disk_path))
                .map(|()| true),
            (Decision::ClearArchiveAttribute, Some(orig), _) => {
                Ok(clear_archive(&self.pair.original_path.join(&orig.disk_path)))
            }
            (Decision::Skip(_), _, _) => Ok(false),
            (decision, _, _) => Err(Error::other(format!(
                "{} needs a file that does not exist: {}",
                decision, relative
            ))),
        };

        match &result {
            Ok(true) => {
                self.context.failures().clear(&record_path);
            }
            Ok(false) | Err(Error::Cancelled) => {}
            Err(_) => {
                if let Some(kind) = decision.failure_kind() {
                    self.context.failures().record(&record_path, kind);
                }
            }
        }
        result
    }

    fn progress(&self) -> impl Fn(&CodecProgress<'_>) -> ProgressAction + '_ {
        move |_| self.cancel.progress_action()
    }

    fn encrypt(
        &self,
        orig: &FileData,
        crypt: Option<&FileData>,
        mode: CompressionMode,
    ) -> Result<()> {
        let source = self.pair.original_path.join(&orig.disk_path);
        // Fail before touching the destination when the source is locked
        File::open(&source)
            .map_err(|e| Error::crypto(&source, format!("cannot read source: {}", e)))?;

        let encoded = self.names.encode(&orig.relative_path);
        let dest = self.pair.encrypted_path.join(&encoded);
        let temp = temp_next_to(&dest).map_err(|e| Error::crypto(&dest, e.to_string()))?;

        self.codec.encrypt(
            &source,
            &temp,
            self.pair.password.expose(),
            mode,
            &self.progress(),
        )?;
        self.context.notify_ignore().insert(&dest);
        temp.persist(&dest)
            .map_err(|e| Error::crypto(&dest, e.error.to_string()))?;
        restamp(&dest, orig.last_write_time);

        if let Some(crypt) = crypt {
            self.remove_stale(crypt, &encoded);
        }
        debug!("Encrypted {} to {}", source.display(), dest.display());
        Ok(())
    }

    fn decrypt(&self, orig: Option<&FileData>, crypt: &FileData) -> Result<()> {
        let source = self.pair.encrypted_path.join(&crypt.disk_path);
        let dest = self
            .pair
            .original_path
            .join(orig.map_or(crypt.relative_path.as_str(), |o| o.disk_path.as_str()));
        let temp = temp_next_to(&dest).map_err(|e| Error::crypto(&dest, e.to_string()))?;

        let decrypted = self.codec.decrypt(
            &source,
            &temp,
            self.pair.password.expose(),
            &self.progress(),
        );
        if let Err(e) = decrypted {
            drop(temp);
            if matches!(e, Error::Cancelled) || crypt.name_was_encrypted || dest.exists() {
                return Err(e);
            }
            return self.move_undecryptable(&source, &dest, crypt, e);
        }

        self.context.notify_ignore().insert(&dest);
        temp.persist(&dest)
            .map_err(|e| Error::crypto(&dest, e.error.to_string()))?;
        restamp(&dest, crypt.last_write_time);
        debug!("Decrypted {} to {}", source.display(), dest.display());
        Ok(())
    }

    /// Last resort for a plainly named file that does not decrypt
    fn move_undecryptable(
        &self,
        source: &Path,
        dest: &Path,
        crypt: &FileData,
        error: Error,
    ) -> Result<()> {
        self.context.notify_ignore().insert(source);
        self.context.notify_ignore().insert(dest);
        match fs::rename(source, dest) {
            Ok(()) => {
                warn!(
                    "{} could not be decrypted ({}), moved it unchanged to {}",
                    crypt.disk_path,
                    error,
                    dest.display()
                );
                Ok(())
            }
            Err(move_error) => {
                debug!("Raw move of {} failed: {}", source.display(), move_error);
                Err(error)
            }
        }
    }

    fn copy_to_encrypted(&self, orig: &FileData, crypt: Option<&FileData>) -> Result<()> {
        let source = self.pair.original_path.join(&orig.disk_path);
        let target_rel = crypt
            .filter(|c| !c.name_was_encrypted)
            .map_or(orig.relative_path.as_str(), |c| c.disk_path.as_str())
            .to_string();
        let dest = self.pair.encrypted_path.join(&target_rel);
        self.copy_file(&source, &dest, orig.last_write_time)?;

        if let Some(crypt) = crypt {
            self.remove_stale(crypt, &target_rel);
        }
        Ok(())
    }

    fn copy_to_original(&self, orig: Option<&FileData>, crypt: &FileData) -> Result<()> {
        let source = self.pair.encrypted_path.join(&crypt.disk_path);
        let dest = self
            .pair
            .original_path
            .join(orig.map_or(crypt.relative_path.as_str(), |o| o.disk_path.as_str()));
        self.copy_file(&source, &dest, crypt.last_write_time)
    }

    fn copy_file(&self, source: &Path, dest: &Path, mtime: FileTime) -> Result<()> {
        let temp = temp_next_to(dest).map_err(|e| Error::copy(dest, e.to_string()))?;
        fs::copy(source, &temp).map_err(|e| Error::copy(source, e.to_string()))?;
        self.context.notify_ignore().insert(dest);
        temp.persist(dest)
            .map_err(|e| Error::copy(dest, e.error.to_string()))?;
        restamp(dest, mtime);
        debug!("Copied {} to {}", source.display(), dest.display());
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<()> {
        self.context.notify_ignore().insert(path);
        match delete_file(self.soft_delete.as_ref(), path)? {
            DeleteMethod::Soft => {
                debug!("Moved {} to {}", path.display(), self.soft_delete.name());
            }
            DeleteMethod::Hard => debug!("Deleted {}", path.display()),
        }
        Ok(())
    }

    /// Remove the encrypted-side file when it lives under another name
    fn remove_stale(&self, crypt: &FileData, current_rel: &str) {
        if crypt.disk_path.to_lowercase() == current_rel.to_lowercase() {
            return;
        }
        let stale = self.pair.encrypted_path.join(&crypt.disk_path);
        self.context.notify_ignore().insert(&stale);
        match fs::remove_file(&stale) {
            Ok(()) => debug!("Removed stale {}", stale.display()),
            Err(e) => warn!("Could not remove stale {}: {}", stale.display(), e),
        }
    }
}

fn temp_next_to(dest: &Path) -> io::Result<TempPath> {
    let dir = dest
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
    fs::create_dir_all(dir)?;
    let temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)?
        .into_temp_path();
    trace!("Writing through {}", temp.display());
    Ok(temp)
}

fn clear_archive(path: &Path) -> bool {
    match clear_archive_attribute(path) {
        Ok(was_set) => was_set,
        Err(e) => {
            warn!("Could not clear archive attribute of {}: {}", path.display(), e);
            false
        }
    }
}

fn same_time(actual: FileTime, expected: FileTime) -> bool {
    actual == expected || actual.unix_seconds() == expected.unix_seconds()
}

/// Force the modification time of `path`, checking it by reading it back
///
/// Failing to set the time is logged; the file itself is already in place.
pub fn restamp(path: &Path, mtime: FileTime) {
    let result = RetryPolicy::timestamp().run(|attempt| {
        filetime::set_file_mtime(path, mtime)?;
        let actual = FileTime::from_last_modification_time(&fs::metadata(path)?);
        if same_time(actual, mtime) {
            Ok(())
        } else {
            trace!("Timestamp of {} off after attempt {}", path.display(), attempt);
            Err(io::Error::new(
                io::ErrorKind::Other,
                format!("timestamp reads back as {}", actual),
            ))
        }
    });
    if let Err(e) = result {
        warn!("Could not set timestamp of {}: {}", path.display(), e);
    }
}
