//! fieldsync CLI
//!
//! Command-line interface for the fieldsync offline-first sync engine.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fieldsync_core::{Collection, Config};

mod commands;
mod engine;
mod output;
mod probe;

use engine::Engine;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "fieldsync - offline-first farm records with background sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List records of a collection
    #[command(alias = "ls")]
    List {
        /// Collection (fields, operations, observations, personnel, machinery, warehouse_items)
        collection: Collection,
        /// Secondary index to filter by (e.g. companyId)
        #[arg(long, requires = "value")]
        index: Option<String>,
        /// Value the indexed key must equal
        #[arg(long, requires = "index")]
        value: Option<String>,
    },
    /// Show one record
    #[command(alias = "show")]
    Get { collection: Collection, id: String },
    /// Create a record from a JSON object ("-" reads stdin)
    #[command(alias = "add")]
    Create { collection: Collection, data: String },
    /// Update a record with fields from a JSON object ("-" reads stdin)
    #[command(alias = "edit")]
    Update {
        collection: Collection,
        id: String,
        data: String,
        /// Send DATA as the whole record instead of merging it
        #[arg(long)]
        replace: bool,
    },
    /// Delete a record
    #[command(alias = "rm")]
    Delete { collection: Collection, id: String },
    /// Show store, queue and server status
    Status,
    /// List mutations waiting to be pushed
    #[command(alias = "queue")]
    Pending,
    /// Remove acknowledged entries from the mutation queue
    Purge,
    /// Push queued changes and refresh every collection
    Sync,
    /// Keep syncing in the foreground until interrupted
    Daemon,
    /// Forget cached offline data (queued changes are kept)
    Forget {
        collection: Option<Collection>,
        /// Forget every collection
        #[arg(long, conflicts_with = "collection")]
        all: bool,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, api_url, sync_interval_secs, pull_policy, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands work without opening the store
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_ref(), &output);
    }

    let config = Config::load_with_cli_override(cli.config.as_ref())
        .context("Failed to load configuration")?;
    init_logging(&config, matches!(cli.command, Commands::Daemon));

    let engine = Engine::open(config)?;

    let is_read = matches!(cli.command, Commands::List { .. } | Commands::Get { .. });
    let is_write = matches!(
        cli.command,
        Commands::Create { .. } | Commands::Update { .. } | Commands::Delete { .. }
    );

    // Refresh before reads so they see the latest server data
    if is_read {
        engine.auto_sync(&output).await;
    }

    let result = match cli.command {
        Commands::List {
            collection,
            index,
            value,
        } => {
            let filter = index.zip(value);
            commands::record::list(&engine, collection, filter, &output).await
        }
        Commands::Get { collection, id } => {
            commands::record::get(&engine, collection, id, &output).await
        }
        Commands::Create { collection, data } => {
            commands::record::create(&engine, collection, data, &output).await
        }
        Commands::Update {
            collection,
            id,
            data,
            replace,
        } => commands::record::update(&engine, collection, id, data, replace, &output).await,
        Commands::Delete { collection, id } => {
            commands::record::delete(&engine, collection, id, &output).await
        }
        Commands::Status => commands::status::show(&engine, &output).await,
        Commands::Pending => commands::queue::pending(&engine, &output),
        Commands::Purge => commands::queue::purge(&engine, &output),
        Commands::Sync => commands::sync::sync(&engine, &output).await,
        Commands::Daemon => commands::sync::daemon(&engine, &output).await,
        Commands::Forget { collection, all } => {
            if collection.is_none() && !all {
                bail!("Name a collection to forget, or pass --all");
            }
            commands::record::forget(&engine, collection, &output)
        }
        Commands::Config { .. } => unreachable!(), // Handled above
    };

    // Push right away after writes
    if is_write && result.is_ok() {
        engine.auto_sync(&output).await;
    }

    result
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Initialize file logging
///
/// Only initializes if FIELDSYNC_LOG is set, except for the daemon which
/// logs at `info` by default. Logs go to config.log_file or
/// {data_dir}/fieldsync.log.
fn init_logging(config: &Config, daemon: bool) {
    let log_level = match std::env::var("FIELDSYNC_LOG") {
        Ok(level) => level,
        Err(_) if daemon => "info".to_string(),
        Err(_) => return,
    };

    let log_path = config.log_path();
    if let Some(parent) = log_path.parent() {
        // Open reports the failure below
        let _ = std::fs::create_dir_all(parent);
    }
    let log_file = match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            return;
        }
    };

    let env_filter = EnvFilter::new(format!(
        "fieldsync_core={},fieldsync_cli={}",
        log_level, log_level
    ));

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init();

    info!("Logging initialized to {:?}", log_path);
}
