//! JSON output structures for the CryptSync CLI

use crate::display::format_label;
use cryptsync_config::SyncPair;
use cryptsync_engine::SyncOutcome;
use cryptsync_types::{FailureKind, SyncStats};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// JSON report of a finished pass
#[derive(Debug, Serialize, Deserialize)]
pub struct SyncResultJson {
    /// Operation metadata
    pub metadata: OperationMetadata,
    /// Counters summed over all pairs
    pub stats: SyncStats,
    /// Paths whose last action failed
    pub failures: Vec<FailureJson>,
    /// Overall result
    pub result: OperationResult,
}

/// Operation metadata
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationMetadata {
    /// CryptSync version
    pub version: String,
    /// Command name
    pub operation: String,
    /// Timestamp when the report was built
    pub timestamp: String,
    /// Who requested the pass
    pub trigger: String,
}

/// One failed path
#[derive(Debug, Serialize, Deserialize)]
pub struct FailureJson {
    /// Original-side path
    pub path: String,
    /// Failed operation
    pub kind: FailureKind,
}

/// Overall result
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationResult {
    /// No error bit set
    pub success: bool,
    /// Raw error bits, also the exit code
    pub exit_code: u32,
    /// Error bits by name
    pub flags: String,
    /// Elapsed time in milliseconds
    pub duration_ms: u64,
}

/// One configured pair
#[derive(Debug, Serialize, Deserialize)]
pub struct PairJson {
    /// Plaintext folder
    pub original_path: String,
    /// Encrypted folder
    pub encrypted_path: String,
    /// Whether the pair is synced
    pub enabled: bool,
    /// Direction label
    pub direction: String,
    /// Container format
    pub format: String,
    /// Whether names are encrypted
    pub encrypt_names: bool,
    /// Whether deletions propagate
    pub sync_deletions: bool,
}

impl SyncResultJson {
    /// Build the report for `operation`
    pub fn from_outcome(operation: &str, outcome: &SyncOutcome, elapsed: Duration) -> Self {
        Self {
            metadata: OperationMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                operation: operation.to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                trigger: outcome.trigger.to_string(),
            },
            stats: outcome.stats.clone(),
            failures: outcome
                .failures
                .iter()
                .map(|(path, kind)| FailureJson {
                    path: path.display().to_string(),
                    kind: *kind,
                })
                .collect(),
            result: OperationResult {
                success: outcome.flags.is_empty(),
                exit_code: outcome.flags.bits(),
                flags: outcome.flags.to_string(),
                duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            },
        }
    }
}

impl From<&SyncPair> for PairJson {
    fn from(pair: &SyncPair) -> Self {
        Self {
            original_path: pair.original_path.display().to_string(),
            encrypted_path: pair.encrypted_path.display().to_string(),
            enabled: pair.enabled,
            direction: pair.sync_direction.to_string(),
            format: format_label(pair).to_string(),
            encrypt_names: pair.encrypt_names,
            sync_deletions: pair.sync_deletions,
        }
    }
}

/// Pretty-printed JSON text
pub fn to_pretty<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
