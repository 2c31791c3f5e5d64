//! Content codec backed by the external `gpg` tool
//!
//! Files are encrypted symmetrically with ASCII armor. The child process is
//! polled so that cancellation can kill it instead of waiting for it.

use cryptsync_types::{
    CodecProgress, CompressionMode, ContentCodec, Error, ProgressAction, Result,
};
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Interval between child status checks
pub const GPG_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs `gpg` in batch mode with a loopback passphrase
#[derive(Debug, Clone)]
pub struct GpgCodec {
    program: PathBuf,
    poll_interval: Duration,
}

impl Default for GpgCodec {
    fn default() -> Self {
        Self::new("gpg")
    }
}

impl GpgCodec {
    /// Codec running the given executable
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            poll_interval: GPG_POLL_INTERVAL,
        }
    }

    fn base_args(password: &str) -> Vec<OsString> {
        ["--batch", "--yes", "--pinentry-mode", "loopback"]
            .into_iter()
            .map(OsString::from)
            .chain([OsString::from("--passphrase"), OsString::from(password)])
            .collect()
    }

    /// Arguments for encrypting `source` into `archive`
    pub fn encrypt_args(
        source: &Path,
        archive: &Path,
        password: &str,
        mode: CompressionMode,
    ) -> Vec<OsString> {
        let mut args = Self::base_args(password);
        args.push("-c".into());
        args.push("-a".into());
        if !mode.is_enabled() {
            args.push("-z".into());
            args.push("0".into());
        }
        args.push("-o".into());
        args.push(archive.into());
        args.push(source.into());
        args
    }

    /// Arguments for decrypting `archive` into `destination`
    pub fn decrypt_args(archive: &Path, destination: &Path, password: &str) -> Vec<OsString> {
        let mut args = Self::base_args(password);
        args.push("-d".into());
        args.push("-o".into());
        args.push(destination.into());
        args.push(archive.into());
        args
    }

    fn run(
        &self,
        args: Vec<OsString>,
        input: &Path,
        output: &Path,
        progress: &dyn Fn(&CodecProgress<'_>) -> ProgressAction,
    ) -> Result<()> {
        let working_dir = output
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(working_dir)
            .map_err(|e| Error::crypto(input, format!("cannot create {}: {}", working_dir.display(), e)))?;

        let total = std::fs::metadata(input).map(|m| m.len()).unwrap_or(0);
        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::crypto(
                    input,
                    format!("failed to start {}: {}", self.program.display(), e),
                )
            })?;
        debug!("Started {} for {}", self.program.display(), input.display());

        let stderr = child.stderr.take().map(drain);
        self.wait(child, stderr, input, total, progress)
    }

    fn wait(
        &self,
        mut child: Child,
        stderr: Option<JoinHandle<String>>,
        input: &Path,
        total: u64,
        progress: &dyn Fn(&CodecProgress<'_>) -> ProgressAction,
    ) -> Result<()> {
        loop {
            let status = child
                .try_wait()
                .map_err(|e| Error::crypto(input, format!("failed to poll gpg: {}", e)))?;
            if let Some(status) = status {
                if status.success() {
                    return Ok(());
                }
                let stderr = stderr
                    .and_then(|reader| reader.join().ok())
                    .unwrap_or_default();
                return Err(Error::crypto(
                    input,
                    format!("gpg exited with {}: {}", status, stderr.trim()),
                ));
            }

            let snapshot = CodecProgress {
                processed: 0,
                total,
                current_item: input,
            };
            if progress(&snapshot) == ProgressAction::Abort {
                if let Err(e) = child.kill() {
                    warn!("Failed to kill gpg for {}: {}", input.display(), e);
                }
                let _ = child.wait();
                return Err(Error::Cancelled);
            }
            thread::sleep(self.poll_interval);
        }
    }
}

/// Collect the child's stderr on its own thread so a full pipe never stalls it
fn drain(mut pipe: ChildStderr) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut text = String::new();
        if let Err(e) = pipe.read_to_string(&mut text) {
            debug!("Failed to read gpg stderr: {}", e);
        }
        text
    })
}

impl ContentCodec for GpgCodec {
    fn name(&self) -> &'static str {
        "gpg"
    }

    fn encrypt(
        &self,
        source: &Path,
        archive: &Path,
        password: &str,
        mode: CompressionMode,
        progress: &dyn Fn(&CodecProgress<'_>) -> ProgressAction,
    ) -> Result<()> {
        let args = Self::encrypt_args(source, archive, password, mode);
        self.run(args, source, archive, progress)
    }

    fn decrypt(
        &self,
        archive: &Path,
        destination: &Path,
        password: &str,
        progress: &dyn Fn(&CodecProgress<'_>) -> ProgressAction,
    ) -> Result<()> {
        let args = Self::decrypt_args(archive, destination, password);
        self.run(args, archive, destination, progress)
    }
}
