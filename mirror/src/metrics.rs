//! Metrics definitions for sync monitoring.

use std::time::Instant;

use metrics::histogram;
use tracing::info;

/// Label for table name in metrics.
pub const TABLE_NAME_LABEL: &str = "table_name";

/// Label for the load action kind in metrics.
pub const ACTION_LABEL: &str = "action";

/// Label for error kind in metrics.
pub const ERROR_KIND_LABEL: &str = "error_kind";

/// Label for the name of a measured run.
pub const RUN_LABEL: &str = "run";

/// Counter for table loads that completed successfully.
pub const MIRROR_TABLE_LOADS_TOTAL: &str = "mirror_table_loads_total";

/// Counter for table loads that failed.
pub const MIRROR_TABLE_LOAD_FAILURES_TOTAL: &str = "mirror_table_load_failures_total";

/// Counter for rows written into the target.
pub const MIRROR_ROWS_LOADED_TOTAL: &str = "mirror_rows_loaded_total";

/// Counter for completed incremental cycles, successful or not.
pub const MIRROR_INCREMENTAL_CYCLES_TOTAL: &str = "mirror_incremental_cycles_total";

/// Counter for transient cycle failures the incremental loop retried.
pub const MIRROR_TRANSIENT_RETRIES_TOTAL: &str = "mirror_transient_retries_total";

/// Counter for registry entries removed by maintenance.
pub const MIRROR_REGISTRY_PURGED_TOTAL: &str = "mirror_registry_purged_total";

/// Counter for errors reported through an error handler.
pub const MIRROR_ERRORS_REPORTED_TOTAL: &str = "mirror_errors_reported_total";

/// Histogram for the duration of measured runs.
pub const MIRROR_RUN_DURATION_SECONDS: &str = "mirror_run_duration_seconds";

/// Awaits `future` and records how long it took under `label`.
///
/// The output is returned untouched, errors included.
pub async fn measure<F, T>(label: &'static str, future: F) -> T
where
    F: Future<Output = T>,
{
    let started = Instant::now();
    let output = future.await;
    let duration_secs = started.elapsed().as_secs_f64();

    histogram!(MIRROR_RUN_DURATION_SECONDS, RUN_LABEL => label).record(duration_secs);
    info!(run = label, duration_secs, "run finished");

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn measure_is_transparent() {
        let ok: Result<u8, &str> = measure("batch", async { Ok(7) }).await;
        let err: Result<u8, &str> = measure("batch", async { Err("boom") }).await;

        assert_eq!(ok, Ok(7));
        assert_eq!(err, Err("boom"));
    }
}
