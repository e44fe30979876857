use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wt_cli::commands::{dump, init, prune, reset, stats, track};
use wt_cli::{Cli, Commands, Config};
use wt_core::{Aggregates, KeyValueStore, MemoryStore, SystemClock};
use wt_db::SqliteStore;

/// Blocking stdin reads cannot be cancelled, so shutdown does not wait for them.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(250);

/// Load config and open the store, ensuring the parent directory exists.
fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let store = SqliteStore::open(&config.database_path).with_context(|| {
        format!("failed to open database {}", config.database_path.display())
    })?;
    Ok(Arc::new(store))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let Some(command) = cli.command else {
        // No subcommand, show help
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let result = runtime.block_on(dispatch(command, &config));
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    result
}

async fn dispatch(command: Commands, config: &Config) -> Result<()> {
    let mut stdout = std::io::stdout();
    let clock = SystemClock;

    match command {
        Commands::Track { ephemeral, live } => {
            let store: Arc<dyn KeyValueStore> = if ephemeral {
                Arc::new(MemoryStore::new())
            } else {
                open_store(config)?
            };
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            let summary = track::run(input, store, config.timing(), live).await?;
            tracing::info!(
                events = summary.events,
                flushes = summary.flushes,
                reason = ?summary.reason,
                "done"
            );
        }
        Commands::Stats {
            week_offset,
            json,
            follow,
        } => {
            let aggregates = Aggregates::new(open_store(config)?);
            if follow {
                let poll = config.timing().display_poll;
                stats::follow(&mut stdout, &aggregates, &clock, week_offset, json, poll).await?;
            } else {
                stats::run(&mut stdout, &aggregates, &clock, week_offset, json).await?;
            }
        }
        Commands::Dump { json } => {
            let aggregates = Aggregates::new(open_store(config)?);
            dump::run(&mut stdout, &aggregates, json).await?;
        }
        Commands::Prune => {
            let aggregates = Aggregates::new(open_store(config)?);
            prune::run(&mut stdout, &aggregates, &clock).await?;
        }
        Commands::Reset { yes, purge } => {
            let store = open_store(config)?;
            if purge {
                reset::purge(&mut stdout, &store, yes)?;
            } else {
                let aggregates = Aggregates::new(store);
                reset::run(&mut stdout, &aggregates, &clock, yes).await?;
            }
        }
        Commands::Init => {
            let store = open_store(config)?;
            let aggregates = Aggregates::new(store.clone());
            init::run(&mut stdout, &store, &aggregates, &clock, &config.database_path).await?;
        }
    }

    Ok(())
}
