//! CLI entry point for fs-shadow.
//!
//! Mirrors a directory as a shadow tree and prints the changes to it as
//! event transactions, or replays a recorded stream of transactions into a
//! virtual replica.
//!
//! # Usage
//!
//! ```bash
//! fs-shadow [OPTIONS] <COMMAND>
//!
//! # Follow a directory, printing transactions as JSON lines
//! fs-shadow watch ./project --record project.fsh
//!
//! # Scan once and write a nested JSON snapshot
//! fs-shadow snapshot ./project -o snapshot.json
//!
//! # Scan once and print the tree
//! fs-shadow dump ./project
//!
//! # Rebuild a recorded tree without touching disk
//! fs-shadow replay /replica/project project.fsh
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use color_eyre::eyre::eyre;
use fsh_core::{Config, EventTransaction, FileTree, FrameReader, WatchConfig, write_frame};
use fsh_watcher::{TreeWatcher, WatchError};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Mirrors a directory tree in memory and reports every change to it.
#[derive(Parser)]
#[command(name = "fs-shadow", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file.
    ///
    /// Defaults to the built-in settings if not specified.
    #[arg(short, long, global = true, env = "FS_SHADOW_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Skip hidden entries (names starting with a dot).
    #[arg(long, global = true)]
    skip_hidden: bool,

    /// Do not compute content checksums for files.
    #[arg(long, global = true)]
    no_checksums: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Follow a directory and print each transaction as a JSON line.
    Watch {
        /// Directory to mirror.
        path: Utf8PathBuf,

        /// Also append every transaction, starting with the root, to this
        /// file as length-prefixed records.
        #[arg(short, long)]
        record: Option<Utf8PathBuf>,
    },

    /// Scan a directory once and write its tree as nested JSON.
    Snapshot {
        /// Directory to scan.
        path: Utf8PathBuf,

        /// Output file (defaults to stdout).
        #[arg(short, long)]
        output: Option<Utf8PathBuf>,
    },

    /// Scan a directory once and print its tree.
    Dump {
        /// Directory to scan.
        path: Utf8PathBuf,
    },

    /// Feed a recorded transaction file into a virtual tree and print it.
    Replay {
        /// Path naming the replica's root; never looked up on disk.
        root: Utf8PathBuf,

        /// File written by `watch --record`.
        file: Utf8PathBuf,
    },
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default. Logs
/// go to stderr so stdout carries only command output.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},mio=warn,notify=warn,ignore=warn"))
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(use_ansi)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// Builds the watcher configuration from the config file and CLI flags.
///
/// Flags only ever switch behaviour on, so they are applied after the file.
///
/// # Errors
///
/// Returns an error if the config file cannot be loaded or the result is
/// invalid.
fn build_config(cli: &Cli) -> color_eyre::Result<WatchConfig> {
    let mut config = match &cli.config {
        Some(path) => Config::from_json_file(path)
            .map_err(|e| eyre!("Failed to load config {}: {}", path, e))?,
        None => Config::default(),
    };

    if cli.skip_hidden {
        config.watch.skip_hidden = true;
    }
    if cli.no_checksums {
        config.watch.compute_checksums = false;
    }
    config.validate()?;

    Ok(config.watch)
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Follows `path` until Ctrl-C (or SIGTERM on Unix).
///
/// Transactions go to stdout as JSON lines, errors to stderr. With
/// `record`, every transaction is also appended to that file.
async fn run_watch(
    config: &WatchConfig,
    path: &Utf8Path,
    record: Option<&Utf8Path>,
) -> color_eyre::Result<()> {
    let (mut watcher, initial) = TreeWatcher::new_real(path, config).await?;
    info!(root = %watcher.root(), "Watching");

    let mut sink = TransactionSink::open(record)?;
    sink.emit(&initial)?;

    watcher.start().await?;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                info!("Shutting down");
                break;
            }
            output = watcher.next_output() => match output {
                Some(Ok(tx)) => sink.emit(&tx)?,
                Some(Err(err)) => report(&err),
                None => break,
            },
        }
    }

    let dropped = watcher.dropped();
    if dropped > 0 {
        warn!(dropped, "Transactions were dropped while watching");
    }
    watcher.stop().await?;
    Ok(())
}

/// Scans `path` once and writes its snapshot as pretty JSON.
async fn run_snapshot(
    config: &WatchConfig,
    path: &Utf8Path,
    output: Option<&Utf8Path>,
) -> color_eyre::Result<()> {
    let mut watcher = scan_once(config, path).await?;
    let snapshot = watcher.tree().await?.snapshot();
    watcher.stop().await?;

    let content = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| eyre!("Failed to serialize snapshot: {}", e))?;

    if let Some(output_path) = output {
        std::fs::write(output_path.as_std_path(), format!("{content}\n"))?;
        info!(path = %output_path, nodes = snapshot.node_count(), "Snapshot written");
    } else {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{content}")?;
    }

    Ok(())
}

/// Scans `path` once and prints the tree dump.
async fn run_dump(config: &WatchConfig, path: &Utf8Path) -> color_eyre::Result<()> {
    let mut watcher = scan_once(config, path).await?;
    let dump = watcher.dump().await?;
    watcher.stop().await?;

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    write!(handle, "{dump}")?;
    Ok(())
}

/// Replays a recorded transaction file into a virtual tree rooted at
/// `root` and prints the resulting dump.
///
/// The first record must describe the root; it seeds the replica so the
/// root UUID matches the recording. Records that fail to decode or apply
/// are reported and skipped.
async fn run_replay(
    config: &WatchConfig,
    root: &Utf8Path,
    file: &Utf8Path,
) -> color_eyre::Result<()> {
    let reader = File::open(file.as_std_path())
        .map_err(|e| eyre!("Failed to open recording {}: {}", file, e))?;
    let mut records = FrameReader::new(BufReader::new(reader));

    let first = records
        .next_record()?
        .ok_or_else(|| eyre!("Recording is empty: {}", file))?;
    let origin = EventTransaction::decode(&first)?;
    if origin.parent_uuid.is_some() {
        return Err(eyre!("First record does not describe a root: {}", origin));
    }

    let seed = FileTree::with_root(origin.to_node());
    let (mut replica, feeder, _) = TreeWatcher::new_virtual(root, Some(seed), config).await?;
    replica.start().await?;

    let mut applied = 0_usize;
    let mut failed = 0_usize;
    while let Some(record) = records.next_record()? {
        if let Err(err) = feeder.send_encoded(&record).await {
            failed += 1;
            report(&err);
            continue;
        }
        // Every delivered transaction yields one output.
        match replica.next_output().await {
            Some(Ok(_)) => applied += 1,
            Some(Err(err)) => {
                failed += 1;
                report(&err);
            }
            None => return Err(eyre!("Replica stopped while replaying")),
        }
    }
    info!(applied, failed, "Replay complete");

    // The feeder must outlive the dump; dropping it ends the replica's task.
    let dump = replica.dump().await?;
    replica.stop().await?;
    drop(feeder);

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    write!(handle, "{dump}")?;
    Ok(())
}

// =============================================================================
// HELPERS
// =============================================================================

/// Builds a real watcher, reporting anything the initial scan could not
/// read, without following further changes.
async fn scan_once(config: &WatchConfig, path: &Utf8Path) -> color_eyre::Result<TreeWatcher> {
    let (mut watcher, _) = TreeWatcher::new_real(path, config).await?;
    while let Ok(err) = watcher.errors().try_recv() {
        report(&err);
    }
    Ok(watcher)
}

/// Writes a non-fatal watcher error to stderr.
fn report(err: &WatchError) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = writeln!(handle, "warning: {err}");
}

/// Resolves when the process is asked to stop.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Destination of transactions printed by `watch`.
struct TransactionSink {
    stdout: std::io::Stdout,
    record: Option<BufWriter<File>>,
}

impl TransactionSink {
    /// Opens the record file for appending, if one is requested.
    fn open(record: Option<&Utf8Path>) -> color_eyre::Result<Self> {
        let record = record
            .map(|path| {
                File::options()
                    .create(true)
                    .append(true)
                    .open(path.as_std_path())
                    .map(BufWriter::new)
                    .map_err(|e| eyre!("Failed to open record file {}: {}", path, e))
            })
            .transpose()?;
        Ok(Self {
            stdout: std::io::stdout(),
            record,
        })
    }

    /// Prints `tx` as one JSON line and appends it to the record file.
    fn emit(&mut self, tx: &EventTransaction) -> color_eyre::Result<()> {
        let line = serde_json::to_string(tx)?;
        let mut handle = self.stdout.lock();
        writeln!(handle, "{line}")?;

        if let Some(record) = &mut self.record {
            write_frame(record, &tx.encode()?)?;
            record.flush()?;
        }
        Ok(())
    }
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Resolve configuration
    let config = build_config(&cli)?;

    // 5. Route to appropriate command
    match &cli.command {
        Commands::Watch { path, record } => run_watch(&config, path, record.as_deref()).await,
        Commands::Snapshot { path, output } => {
            run_snapshot(&config, path, output.as_deref()).await
        }
        Commands::Dump { path } => run_dump(&config, path).await,
        Commands::Replay { root, file } => run_replay(&config, root, file).await,
    }
}
