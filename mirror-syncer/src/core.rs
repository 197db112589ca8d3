use mirror::concurrency::stop::StopHandle;
use mirror::manager::SyncManager;
use mirror::plan::TableSelection;
use mirror_config::shared::{PgConnectionConfig, SyncConfig};
use mirror_postgres::{PgConnectionFactory, PgLoadActionFactory, PostgresRegistry};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

use crate::error::SyncerResult;
use crate::sentry::SentryErrorHandler;

/// Run requested on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Run {
    Batch(TableSelection),
    RefreshRecent(TableSelection),
    Increment,
}

/// Runs `run` against the databases of `config` and closes every connection afterwards.
pub async fn start_syncer_with_config(config: SyncConfig, run: Run) -> SyncerResult<()> {
    info!("starting mirror syncer");

    log_config(&config);

    let registry = PostgresRegistry::new(&config.target);
    let mut manager = SyncManager::new(
        config.clone(),
        PgConnectionFactory::new(&config.load),
        registry.clone(),
        PgLoadActionFactory::new(&config.load),
        SentryErrorHandler::default(),
    );

    let result = match run {
        Run::Batch(selection) => manager.batch(&selection).await,
        Run::RefreshRecent(selection) => manager.refresh_recent(&selection).await,
        Run::Increment => {
            let stop_listener = tokio::spawn(stop_on_signal(manager.stop_handle()));
            let result = manager.increment().await;
            stop_listener.abort();
            let _ = stop_listener.await;

            result
        }
    };

    manager.shutdown().await;
    registry.close().await;

    result?;

    info!("mirror syncer finished");

    Ok(())
}

/// Requests a stop of the incremental loop on SIGINT or SIGTERM.
///
/// The loop finishes its current cycle before returning.
async fn stop_on_signal(stop: StopHandle) {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            warn!(error = %err, "failed to register sigterm handler, only ctrl+c stops the loop");
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("sigint (ctrl+c) received, stopping after the current cycle");
                stop.stop();
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("sigint (ctrl+c) received, stopping after the current cycle");
        }
        _ = sigterm.recv() => {
            info!("sigterm received, stopping after the current cycle");
        }
    }

    stop.stop();
}

fn log_config(config: &SyncConfig) {
    log_pg_connection_config("target", &config.target);
    for (name, source) in &config.sources {
        log_pg_connection_config(name, source);
    }

    for plan in &config.plans {
        info!(
            source = %plan.source,
            schema = ?plan.schema,
            tables = plan.tables.len(),
            "sync plan"
        );
    }

    info!(
        incremental_action = %config.incremental_action,
        extra_tables = ?config.extra_tables,
        max_batch_size = config.load.max_batch_size,
        recent_window_hours = config.load.recent_window_hours,
        max_pool_connections = config.load.max_pool_connections,
        "load config"
    );
}

fn log_pg_connection_config(name: &str, config: &PgConnectionConfig) {
    info!(
        connection = name,
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        tls_enabled = config.tls.enabled,
        "pg connection config",
    );
}
