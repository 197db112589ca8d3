//! Mirror syncer service binary.
//!
//! Loads the sync configuration, initializes telemetry and Sentry and runs one of the sync
//! entry points: a batch load, a refresh of recent rows or the endless incremental loop.

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use mirror::plan::TableSelection;
use mirror_config::shared::SyncConfig;
use mirror_telemetry::metrics::init_metrics;
use mirror_telemetry::tracing::init_tracing;
use tracing::error;

use crate::config::load_sync_config;
use crate::core::{Run, start_syncer_with_config};
use crate::error::{SyncerError, SyncerResult};

mod config;
mod core;
mod error;
mod sentry;

/// The name of the environment variable which contains version information for this binary.
const APP_VERSION_ENV_NAME: &str = "APP_VERSION";

#[derive(Debug, Parser)]
#[command(name = "mirror-syncer", about = "Mirrors source Postgres tables into a target database")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reload the tables, then refresh their recent rows
    Batch(TablesArgs),
    /// Reload the rows inside the recent window
    RefreshRecent(TablesArgs),
    /// Load changed rows in a loop until stopped
    Increment,
}

#[derive(Debug, Args)]
struct TablesArgs {
    /// Tables to run, all tables of the plan when omitted
    #[arg(long, value_delimiter = ',')]
    tables: Vec<String>,
}

impl From<Command> for Run {
    fn from(command: Command) -> Self {
        match command {
            Command::Batch(args) => Run::Batch(TableSelection::from_names(args.tables)),
            Command::RefreshRecent(args) => {
                Run::RefreshRecent(TableSelection::from_names(args.tables))
            }
            Command::Increment => Run::Increment,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli.command.into()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            sentry::capture_error(&err);
            eprint!("{}", err.render_report());

            ExitCode::FAILURE
        }
    }
}

fn run(run: Run) -> SyncerResult<()> {
    let config = load_sync_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(SyncerError::config)?;

    // Sentry is initialized before the runtime starts so that it sees every thread.
    let _sentry_guard = sentry::init(config.sentry.as_ref())?;

    init_metrics(Some(env!("CARGO_BIN_NAME"))).map_err(SyncerError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config, run))
}

async fn async_main(config: SyncConfig, run: Run) -> SyncerResult<()> {
    if let Err(err) = start_syncer_with_config(config, run).await {
        error!("{err}");

        return Err(err);
    }

    Ok(())
}
