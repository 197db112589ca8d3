use std::io;
use std::sync::Once;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

static TEST_TRACING: Once = Once::new();

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to bridge `log` records into tracing: {0}")]
    LogTracer(#[from] tracing_log::log_tracer::SetLoggerError),

    #[error("failed to install the global tracing subscriber: {0}")]
    SetGlobalDefault(#[from] ::tracing::subscriber::SetGlobalDefaultError),
}

/// Flushes buffered log lines when dropped.
///
/// Keep it alive for the whole lifetime of the process, dropping it early loses log output.
#[must_use]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

/// Installs the global tracing subscriber of a service.
///
/// Lines are formatted by a `fmt` layer and written to stdout by a background worker. The
/// filter comes from `RUST_LOG` and defaults to `info`. Records emitted through the `log`
/// crate, e.g. by sqlx, are forwarded to tracing.
pub fn init_tracing(service_name: &str) -> Result<LogFlusher, TracingError> {
    tracing_log::LogTracer::init()?;

    let (writer, guard) = tracing_appender::non_blocking(io::stdout());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_target(true));
    ::tracing::subscriber::set_global_default(subscriber)?;

    ::tracing::info!(service = service_name, "tracing initialized");

    Ok(LogFlusher { _guard: guard })
}

/// Installs a subscriber writing through the test harness, once per process.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
