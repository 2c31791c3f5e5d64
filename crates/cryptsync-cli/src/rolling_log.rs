//! Line-capped log file
//!
//! Keeps the last `max_lines` lines in memory and rewrites the file when the
//! flush interval has passed and on [`RollingLog::flush`].

use std::collections::VecDeque;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug)]
struct LogState {
    path: PathBuf,
    max_lines: usize,
    lines: VecDeque<String>,
    partial: String,
    dirty: bool,
    last_flush: Instant,
    flush_interval: Duration,
}

impl LogState {
    fn push(&mut self, text: &str) {
        self.partial.push_str(text);
        while let Some(end) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=end).collect();
            self.lines.push_back(line.trim_end_matches(['\r', '\n']).to_string());
            self.dirty = true;
        }
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    fn write_out(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let mut contents = String::new();
        for line in &self.lines {
            contents.push_str(line);
            contents.push('\n');
        }
        fs::write(&self.path, contents)?;
        self.dirty = false;
        self.last_flush = Instant::now();
        Ok(())
    }
}

/// Shared handle to a line-capped log file
#[derive(Debug, Clone)]
pub struct RollingLog {
    state: Arc<Mutex<LogState>>,
}

impl RollingLog {
    /// Open `path`, keeping its last `max_lines` lines
    pub fn open<P: AsRef<Path>>(
        path: P,
        max_lines: usize,
        flush_interval: Duration,
    ) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let max_lines = max_lines.max(1);

        let mut lines: VecDeque<String> = match fs::read_to_string(&path) {
            Ok(existing) => existing.lines().map(str::to_string).collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => VecDeque::new(),
            Err(e) => return Err(e),
        };
        let excess = lines.len().saturating_sub(max_lines);
        lines.drain(..excess);

        Ok(Self {
            state: Arc::new(Mutex::new(LogState {
                path,
                max_lines,
                lines,
                partial: String::new(),
                dirty: excess > 0,
                last_flush: Instant::now(),
                flush_interval,
            })),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write buffered lines to disk
    pub fn flush(&self) -> io::Result<()> {
        self.state().write_out()
    }

    /// Write buffered lines if the flush interval has passed
    pub fn flush_if_due(&self) -> io::Result<()> {
        let mut state = self.state();
        if state.last_flush.elapsed() >= state.flush_interval {
            state.write_out()?;
        }
        Ok(())
    }

    /// Append text; complete lines are kept
    pub fn append(&self, text: &str) -> io::Result<()> {
        self.state().push(text);
        self.flush_if_due()
    }
}

/// Writer handed to the tracing formatter
#[derive(Debug)]
pub struct RollingLogWriter(RollingLog);

impl Write for RollingLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.append(&String::from_utf8_lossy(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for RollingLog {
    type Writer = RollingLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RollingLogWriter(self.clone())
    }
}
