//! Terminal display helpers for the CryptSync CLI

use console::style;
use cryptsync_config::SyncPair;
use cryptsync_engine::{SyncOutcome, SyncPhase, SyncProgress};
use cryptsync_types::{FailureKind, SyncStats};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

/// Print a success line
pub fn display_success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error line to stderr
pub fn display_error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), style(message).red());
}

/// Print a warning line to stderr
pub fn display_warning(message: &str) {
    eprintln!("{} {}", style("!").yellow().bold(), style(message).yellow());
}

/// Print an informational line
pub fn display_info(message: &str) {
    println!("{} {}", style("ℹ").blue().bold(), message);
}

/// Print the configured pairs as a numbered list
pub fn display_pairs(pairs: &[SyncPair]) {
    if pairs.is_empty() {
        display_info("No pairs configured");
        return;
    }
    for (index, pair) in pairs.iter().enumerate() {
        let state = if pair.enabled {
            style("enabled").green()
        } else {
            style("disabled").dim()
        };
        println!(
            "{:>3}. {} {} {}  [{}]",
            index + 1,
            style(pair.original_path.display()).bold(),
            style("⇄").cyan(),
            style(pair.encrypted_path.display()).bold(),
            state
        );
        println!(
            "     direction: {}, format: {}, names: {}, deletions: {}",
            pair.sync_direction,
            format_label(pair),
            if pair.encrypt_names { "encrypted" } else { "plain" },
            if pair.sync_deletions { "synced" } else { "kept" }
        );
    }
}

/// Container format label of a pair
pub fn format_label(pair: &SyncPair) -> &'static str {
    if pair.use_archive_format {
        "7z"
    } else if pair.use_external_gpg {
        "gpg"
    } else {
        "cryptsync"
    }
}

/// Print the counters and failure report of a finished pass
pub fn display_outcome(outcome: &SyncOutcome, elapsed: Duration) {
    println!();
    println!(
        "{} {}",
        style("🔐").cyan().bold(),
        style("Sync Summary").bold().underlined()
    );
    display_stats(&outcome.stats);
    println!("  Duration: {}", style(format_duration(elapsed)).cyan());

    if outcome.flags.is_empty() {
        display_success("Sync completed");
    } else {
        display_warning(&format!("Sync finished with: {}", outcome.flags));
    }
    display_failures(&outcome.failures);
}

fn display_stats(stats: &SyncStats) {
    println!("  Pairs: {}", style(stats.pairs).cyan());
    println!("  Encrypted: {}", style(stats.encrypted).green());
    println!("  Decrypted: {}", style(stats.decrypted).green());
    println!("  Copied: {}", style(stats.copied).green());
    println!("  Deleted: {}", style(stats.deleted).yellow());
    println!("  Skipped: {}", style(stats.skipped).dim());
    if stats.failed > 0 {
        println!("  Failed: {}", style(stats.failed).red().bold());
    }
}

/// Print the paths whose last action failed
pub fn display_failures(failures: &[(PathBuf, FailureKind)]) {
    if failures.is_empty() {
        return;
    }
    println!();
    println!(
        "{} {}",
        style("⚠").red().bold(),
        style("Failed paths").bold().underlined()
    );
    for (path, kind) in failures {
        println!("  {} {}", style(format!("{:<8}", kind.to_string())).red(), path.display());
    }
}

/// Spinner polled from the coordinator's progress snapshot
pub fn create_progress_bar(quiet: bool) -> Option<ProgressBar> {
    if quiet {
        return None;
    }

    let pb = ProgressBar::new(0);
    let template = "{spinner:.green} [{elapsed_precise}] {prefix:.bold} \
                    {wide_bar:.cyan/blue} {pos}/{len} {msg}";
    let style = ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

/// Refresh a progress bar from a snapshot
pub fn update_progress_bar(pb: &ProgressBar, progress: &SyncProgress) {
    let prefix = match progress.phase {
        SyncPhase::Idle => "waiting",
        SyncPhase::ScanningOriginal => "scanning original",
        SyncPhase::ScanningEncrypted => "scanning encrypted",
        SyncPhase::Processing => "syncing",
        SyncPhase::Completed => "done",
        SyncPhase::Cancelled => "cancelled",
    };
    pb.set_prefix(format!(
        "{} ({}/{})",
        prefix, progress.pairs_processed, progress.total_pairs
    ));
    pb.set_length(progress.total_files);
    pb.set_position(progress.files_processed);
    pb.set_message(progress.current_file.clone().unwrap_or_default());
}

/// Format a duration for humans
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    if total_secs >= 3600 {
        format!(
            "{}h {}m {}s",
            total_secs / 3600,
            (total_secs % 3600) / 60,
            total_secs % 60
        )
    } else if total_secs >= 60 {
        format!("{}m {}s", total_secs / 60, total_secs % 60)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}
