//! ckm - manage API keys locally and sync them through a Backblaze B2 bucket
//!
//! Every command loads the registry, applies one change, and saves it.
//! Logs go to `<config dir>/logs/ckm.log` so stdout stays clean for output.

mod commands;
mod logging;
mod usage;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use commands::check::CheckArgs;
use commands::keys::{AddArgs, ListArgs, ShowArgs, UpdateArgs};
use commands::remote::RemoteCommand;
use commands::transfer::{ExportArgs, ImportArgs};
use keyswitch_core::FileStorage;
use logging::LogSink;

/// ckm - multi-key manager for OpenAI-compatible APIs
#[derive(Parser, Debug)]
#[command(name = "ckm")]
#[command(version)]
#[command(about = "Manage API keys and sync them between machines")]
struct Cli {
    /// Registry file (default: ~/.codex-manager/config.json)
    #[arg(short, long, global = true, env = "KEYSWITCH_CONFIG")]
    config: Option<PathBuf>,

    /// Log file (default: <config dir>/logs/ckm.log)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Log debug detail
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured keys
    List(ListArgs),
    /// Show one key (the active one by default)
    Show(ShowArgs),
    /// Add a new key
    Add(AddArgs),
    /// Change selected fields of a key
    Update(UpdateArgs),
    /// Remove a key by id or name
    Remove {
        /// Key id or name
        target: String,
    },
    /// Make a key the active one
    Switch {
        /// Key id or name
        target: String,
    },
    /// Report quota usage, optionally refreshed from the provider APIs
    Check(CheckArgs),
    /// Import a registry from a JSON, YAML or TOML file
    Import(ImportArgs),
    /// Export the registry as JSON, YAML or TOML
    Export(ExportArgs),
    /// Sync the registry through a Backblaze B2 bucket
    #[command(subcommand)]
    Remote(RemoteCommand),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => FileStorage::default_path().context("failed to resolve the default registry path")?,
    };
    let log_path = cli
        .log_file
        .unwrap_or_else(|| default_log_path(&config_path));
    let level = if cli.verbose { "debug" } else { "info" };

    // Logging is best-effort; a read-only home should not block key switching
    let sink = match LogSink::init(&log_path, level) {
        Ok(sink) => Some(sink),
        Err(e) => {
            eprintln!("warning: logging disabled: {:#}", e);
            None
        }
    };

    let result = run(cli.command, &config_path).await;
    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }

    let closed = sink.map_or(Ok(()), LogSink::close);
    settle(result, closed)
}

/// The command's outcome wins; a log that fails to flush only warns, like one that fails to open
fn settle(result: Result<()>, closed: Result<()>) -> Result<()> {
    if let Err(e) = closed {
        eprintln!("warning: {:#}", e);
    }
    result
}

async fn run(command: Command, config_path: &Path) -> Result<()> {
    let manager = commands::open_registry(config_path).await?;
    let mut out = std::io::stdout().lock();

    match command {
        Command::List(args) => commands::keys::list(&manager, &args, &mut out).await,
        Command::Show(args) => commands::keys::show(&manager, &args, &mut out).await,
        Command::Add(args) => commands::keys::add(&manager, args, &mut out).await,
        Command::Update(args) => commands::keys::update(&manager, args, &mut out).await,
        Command::Remove { target } => commands::keys::remove(&manager, &target, &mut out).await,
        Command::Switch { target } => commands::keys::switch(&manager, &target, &mut out).await,
        Command::Check(args) => commands::check::check(&manager, &args, &mut out).await,
        Command::Import(args) => commands::transfer::import(&manager, &args, &mut out).await,
        Command::Export(args) => commands::transfer::export(&manager, &args, &mut out).await,
        Command::Remote(remote) => {
            let sync = commands::remote::RemoteSync::new(&manager);
            sync.run(remote, &mut out).await
        }
    }
}

fn default_log_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("logs")
        .join("ckm.log")
}
