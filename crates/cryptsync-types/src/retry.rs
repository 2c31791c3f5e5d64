//! Bounded retry helper
//!
//! Archive tools and some filesystems apply their own timestamps after a file
//! is closed, so re-stamping is retried a fixed number of times.

use std::thread;
use std::time::Duration;

/// Attempts made when forcing a file's modification time
pub const TIMESTAMP_RETRY_ATTEMPTS: u32 = 5;

/// Delay between timestamp attempts
pub const TIMESTAMP_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Fixed-delay retry policy with a hard attempt cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay slept between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a policy; at least one attempt is always made
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            delay,
        }
    }

    /// Policy used when re-stamping modification times
    pub const fn timestamp() -> Self {
        Self::new(TIMESTAMP_RETRY_ATTEMPTS, TIMESTAMP_RETRY_DELAY)
    }

    /// Run `op` until it succeeds or the attempts are exhausted
    ///
    /// The closure receives the 1-based attempt number. The last error is
    /// returned when every attempt fails.
    pub fn run<T, E, F>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(error) if attempt >= self.max_attempts => return Err(error),
                Err(_) => {
                    if !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::timestamp()
    }
}
