//! CryptSync command line interface

mod display;
mod json_output;
mod rolling_log;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use cryptsync_config::{
    AppConfig, ConfigLoader, PairFilters, SyncPair, DEFAULT_COMPRESS_SIZE_LIMIT_MB,
    DEFAULT_IGNORE_PATTERNS,
};
use cryptsync_engine::{
    ChangeReconciler, ChangeWatcher, SyncContext, SyncCoordinator, SyncOutcome, SyncRequest,
};
use cryptsync_types::SyncDirection;
use display::{
    create_progress_bar, display_error, display_failures, display_info, display_outcome,
    display_pairs, display_success, display_warning, update_progress_bar,
};
use json_output::{to_pretty, PairJson, SyncResultJson};
use rolling_log::RollingLog;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Exit code for usage errors, `--help` and `--version`
const USAGE_EXIT_CODE: i32 = 64;

#[derive(Parser)]
#[command(
    name = "cryptsync",
    version = env!("CARGO_PKG_VERSION"),
    about = "Keep encrypted mirrors of your folders in sync",
    long_about = "CryptSync keeps an encrypted copy of each configured folder and \
                  propagates changes both ways, decrypting edits made to the mirror."
)]
struct Cli {
    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print every decision
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync a single pair given on the command line
    Sync {
        #[command(flatten)]
        pair: PairArgs,

        /// Global ignore list, `|`-separated wildcards
        #[arg(long, default_value = DEFAULT_IGNORE_PATTERNS)]
        ignore: String,

        #[command(flatten)]
        log: LogArgs,

        /// Show a progress bar
        #[arg(long)]
        progress: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync every enabled pair of the configuration once
    SyncAll {
        #[command(flatten)]
        log: LogArgs,

        /// Show a progress bar
        #[arg(long)]
        progress: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Watch the configured pairs and sync changes until interrupted
    Watch {
        /// Seconds between full background passes
        #[arg(long)]
        full_scan_secs: Option<u64>,

        #[command(flatten)]
        log: LogArgs,
    },
    /// Manage configured pairs
    Pairs {
        #[command(subcommand)]
        action: PairsCommand,
    },
}

#[derive(Subcommand)]
enum PairsCommand {
    /// List configured pairs
    List {
        /// Print the pairs as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a pair and save the configuration
    Add {
        #[command(flatten)]
        pair: PairArgs,

        /// Add the pair disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Remove the pair with the given original folder
    Remove {
        /// Original folder of the pair
        #[arg(long)]
        src: PathBuf,
    },
}

/// Options of one pair
#[derive(Args, Debug, Clone)]
struct PairArgs {
    /// Original (plaintext) folder
    #[arg(long)]
    src: PathBuf,

    /// Encrypted folder
    #[arg(long)]
    dst: PathBuf,

    /// Password for contents and names
    #[arg(long, default_value = "")]
    password: String,

    /// Paths never synced, `|`-separated wildcards
    #[arg(long, default_value = "")]
    exclude: String,

    /// Paths encrypted without compression
    #[arg(long, default_value = "")]
    crypt_only: String,

    /// Paths copied verbatim instead of encrypted
    #[arg(long, default_value = "")]
    copy_only: String,

    /// Files above this size (MiB) are stored without compression
    #[arg(long, default_value_t = DEFAULT_COMPRESS_SIZE_LIMIT_MB)]
    compress_size_mb: u64,

    /// Encrypt file and folder names
    #[arg(long)]
    encrypt_names: bool,

    /// Use the compact name encoding
    #[arg(long)]
    new_name_scheme: bool,

    /// Which way changes flow
    #[arg(long, value_enum, default_value = "both")]
    direction: DirectionArg,

    /// Container format
    #[arg(long, value_enum, default_value = "7z")]
    format: FormatArg,

    /// Treat timestamps within the FAT tolerance as equal
    #[arg(long)]
    fat: bool,

    /// Propagate deletions
    #[arg(long)]
    sync_deletions: bool,

    /// Clear the archive attribute of up-to-date originals
    #[arg(long)]
    reset_archive: bool,
}

#[derive(Args, Debug, Clone, Default)]
struct LogArgs {
    /// Rolling log file
    #[arg(long)]
    log_path: Option<PathBuf>,

    /// Lines kept in the log file
    #[arg(long)]
    max_log_lines: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DirectionArg {
    Both,
    SrcToDst,
    DstToSrc,
}

impl From<DirectionArg> for SyncDirection {
    fn from(direction: DirectionArg) -> Self {
        match direction {
            DirectionArg::Both => SyncDirection::BothWays,
            DirectionArg::SrcToDst => SyncDirection::SrcToDst,
            DirectionArg::DstToSrc => SyncDirection::DstToSrc,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    #[value(name = "7z")]
    SevenZip,
    Cryptsync,
    Gpg,
}

impl PairArgs {
    fn into_pair(self) -> SyncPair {
        let mut pair = SyncPair::new(&self.src, &self.dst, &self.password);
        pair.encrypt_names = self.encrypt_names;
        pair.encrypt_names_new_scheme = self.new_name_scheme;
        pair.sync_direction = self.direction.into();
        pair.use_archive_format = self.format == FormatArg::SevenZip;
        pair.use_external_gpg = self.format == FormatArg::Gpg;
        pair.fat_time_tolerance = self.fat;
        pair.compress_size_limit_mb = self.compress_size_mb;
        pair.sync_deletions = self.sync_deletions;
        pair.reset_archive_attribute_on_success = self.reset_archive;
        pair.filters = PairFilters {
            no_sync: self.exclude,
            crypt_only: self.crypt_only,
            copy_only: self.copy_only,
        };
        pair
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(USAGE_EXIT_CODE);
        }
    };

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            display_error(&format!("{:#}", e));
            USAGE_EXIT_CODE
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = ConfigLoader::load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    let log_args = match &cli.command {
        Commands::Sync { log, .. } | Commands::SyncAll { log, .. } | Commands::Watch { log, .. } => {
            log.clone()
        }
        Commands::Pairs { .. } => LogArgs::default(),
    };
    let rolling_log = open_rolling_log(&config, &log_args)?;
    init_logging(cli.debug, cli.quiet, cli.verbose, &config, rolling_log.clone())?;

    let result = match cli.command {
        Commands::Sync {
            pair,
            ignore,
            progress,
            json,
            ..
        } => {
            let pair = pair.into_pair();
            pair.validate().context("Invalid pair")?;
            config.pairs = vec![pair];
            config.ignore_patterns = ignore;
            sync_command(&config, "sync", progress, json, cli.quiet).await
        }
        Commands::SyncAll { progress, json, .. } => {
            config.validate().context("Invalid configuration")?;
            if config.pairs.is_empty() {
                display_warning("No pairs configured");
            }
            sync_command(&config, "sync-all", progress, json, cli.quiet).await
        }
        Commands::Watch { full_scan_secs, .. } => {
            config.validate().context("Invalid configuration")?;
            watch_command(&config, full_scan_secs, rolling_log.as_ref(), cli.quiet).await
        }
        Commands::Pairs { action } => pairs_command(&mut config, cli.config, action),
    };

    if let Some(log) = &rolling_log {
        if let Err(e) = log.flush() {
            display_warning(&format!("Failed to write log file: {}", e));
        }
    }
    result
}

fn open_rolling_log(config: &AppConfig, args: &LogArgs) -> Result<Option<RollingLog>> {
    let Some(path) = args.log_path.clone().or_else(|| config.logging.log_file.clone()) else {
        return Ok(None);
    };
    let max_lines = args.max_log_lines.unwrap_or(config.logging.max_lines);
    let flush_interval = Duration::from_secs(config.logging.flush_interval_secs);
    let log = RollingLog::open(&path, max_lines, flush_interval)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;
    Ok(Some(log))
}

fn init_logging(
    debug: bool,
    quiet: bool,
    verbose: bool,
    config: &AppConfig,
    file: Option<RollingLog>,
) -> Result<()> {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else if quiet {
        "error"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let console = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .with_filter(filter);

    let file_level = if debug {
        LevelFilter::DEBUG
    } else {
        config.logging.level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO)
    };
    let file_layer = file.map(|log| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(log)
            .with_filter(file_level)
    });

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

async fn sync_command(
    config: &AppConfig,
    operation: &str,
    show_progress: bool,
    json: bool,
    quiet: bool,
) -> Result<i32> {
    let context = Arc::new(SyncContext::from_config(config));
    let coordinator = Arc::new(SyncCoordinator::new(context));

    if !quiet && !json {
        display_info(&format!(
            "Syncing {} pair(s)",
            config.pairs.iter().filter(|pair| pair.enabled).count()
        ));
    }

    let started = Instant::now();
    let progress_bar = if show_progress && !json {
        create_progress_bar(quiet)
    } else {
        None
    };
    let outcome = run_interactive(&coordinator, progress_bar.as_ref()).await?;
    if let Some(pb) = progress_bar {
        pb.finish_and_clear();
    }
    let elapsed = started.elapsed();

    if json {
        println!(
            "{}",
            to_pretty(&SyncResultJson::from_outcome(operation, &outcome, elapsed))?
        );
    } else if quiet {
        display_failures(&outcome.failures);
    } else {
        display_outcome(&outcome, elapsed);
    }

    Ok(exit_code(&outcome))
}

/// Run one interactive pass, stopping it on Ctrl-C
async fn run_interactive(
    coordinator: &Arc<SyncCoordinator>,
    progress_bar: Option<&indicatif::ProgressBar>,
) -> Result<SyncOutcome> {
    let worker = Arc::clone(coordinator);
    let mut task = tokio::task::spawn_blocking(move || worker.run_blocking());
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let mut stopping = false;

    loop {
        tokio::select! {
            joined = &mut task => {
                return Ok(joined.context("Sync worker panicked")??);
            }
            _ = ticker.tick() => {
                if let Some(pb) = progress_bar {
                    update_progress_bar(pb, &coordinator.progress());
                }
            }
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                display_warning("Stopping after the current file...");
                coordinator.stop();
            }
        }
    }
}

async fn watch_command(
    config: &AppConfig,
    full_scan_secs: Option<u64>,
    rolling_log: Option<&RollingLog>,
    quiet: bool,
) -> Result<i32> {
    let context = Arc::new(SyncContext::from_config(config));
    let coordinator = SyncCoordinator::new(Arc::clone(&context));
    let reconciler = ChangeReconciler::new(Arc::clone(&context));
    let mut watcher = ChangeWatcher::new().context("Failed to start the change watcher")?;
    watcher.sync_with_pairs(&context.enabled_pairs());

    let scan_period =
        Duration::from_secs(full_scan_secs.unwrap_or(config.full_scan_interval_secs).max(1));
    let mut drain = tokio::time::interval(Duration::from_millis(config.notify_drain_interval_ms));
    let mut full_scan = tokio::time::interval(scan_period);
    let mut pending: BTreeSet<PathBuf> = BTreeSet::new();

    if !quiet {
        display_info(&format!(
            "Watching {} folder(s), full pass every {}s, Ctrl-C to stop",
            watcher.watched().count(),
            scan_period.as_secs()
        ));
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = drain.tick() => {
                pending.extend(watcher.get_changed_paths());
                if !pending.is_empty() {
                    let batch = std::mem::take(&mut pending);
                    debug!("Reconciling {} changed path(s)", batch.len());
                    let handler = reconciler.clone();
                    let requeued = tokio::task::spawn_blocking(move || handler.handle_all(batch))
                        .await
                        .context("Reconciler panicked")?;
                    pending.extend(requeued);
                }
                if let Some(log) = rolling_log {
                    if let Err(e) = log.flush_if_due() {
                        warn!("Failed to write log file: {}", e);
                    }
                }
            }
            _ = full_scan.tick() => {
                watcher.sync_with_pairs(&context.enabled_pairs());
                match coordinator.start(SyncRequest::background()) {
                    Ok(started) => debug!("Background pass: {:?}", started),
                    Err(e) => warn!("Failed to start background pass: {}", e),
                }
            }
        }
    }

    info!("Stopping watch");
    coordinator.stop();
    if !quiet {
        display_success("Stopped");
    }
    Ok(0)
}

fn pairs_command(
    config: &mut AppConfig,
    config_path: Option<PathBuf>,
    action: PairsCommand,
) -> Result<i32> {
    let save_path = config_path.unwrap_or_else(ConfigLoader::default_save_path);

    match action {
        PairsCommand::List { json } => {
            if json {
                let pairs: Vec<PairJson> = config.pairs.iter().map(PairJson::from).collect();
                println!("{}", to_pretty(&pairs)?);
            } else {
                display_pairs(&config.pairs);
            }
        }
        PairsCommand::Add { pair, disabled } => {
            let mut pair = pair.into_pair();
            pair.enabled = !disabled;
            let original = pair.original_path.clone();
            config.add_pair(pair).context("Cannot add pair")?;
            ConfigLoader::save_to_file(config, &save_path)
                .with_context(|| format!("Failed to save {}", save_path.display()))?;
            display_success(&format!(
                "Added {} to {}",
                original.display(),
                save_path.display()
            ));
        }
        PairsCommand::Remove { src } => {
            if config.remove_pair(&src).is_none() {
                bail!("No pair for {}", src.display());
            }
            ConfigLoader::save_to_file(config, &save_path)
                .with_context(|| format!("Failed to save {}", save_path.display()))?;
            display_success(&format!("Removed {}", src.display()));
        }
    }
    Ok(0)
}

fn exit_code(outcome: &SyncOutcome) -> i32 {
    i32::try_from(outcome.flags.bits()).unwrap_or(i32::MAX)
}
