//! Error reporting around sync runs.

use std::future::Future;

use metrics::counter;
use tracing::error;

use crate::actions::LoadTask;
use crate::error::{SyncError, SyncResult};
use crate::metrics::{ERROR_KIND_LABEL, MIRROR_ERRORS_REPORTED_TOTAL, TABLE_NAME_LABEL};

/// Observes errors without changing control flow.
pub trait ErrorHandler: Clone + Send + Sync + 'static {
    /// Reports an error that ended a run.
    fn report(&self, error: &SyncError);

    /// Reports the failure of a single table load.
    fn notify_error(&self, task: &LoadTask, error: &SyncError);

    /// Returns `true` for errors the incremental loop retries.
    fn is_transient(&self, error: &SyncError) -> bool {
        error.is_transient()
    }

    /// Awaits `future` and reports its error, if any. The output is returned unchanged.
    fn wrap<F, T>(&self, future: F) -> impl Future<Output = SyncResult<T>> + Send
    where
        F: Future<Output = SyncResult<T>> + Send,
        T: Send,
    {
        let handler = self.clone();
        async move {
            let result = future.await;
            if let Err(err) = &result {
                handler.report(err);
            }

            result
        }
    }
}

/// [`ErrorHandler`] that logs errors and counts them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorHandler;

impl ErrorHandler for TracingErrorHandler {
    fn report(&self, error: &SyncError) {
        error!(error = %error, "sync run failed");
        counter!(
            MIRROR_ERRORS_REPORTED_TOTAL,
            ERROR_KIND_LABEL => format!("{:?}", error.kind()),
        )
        .increment(1);
    }

    fn notify_error(&self, task: &LoadTask, error: &SyncError) {
        error!(
            table = %task.table_name,
            source = %task.source,
            action = %task.kind,
            error = %error,
            "table load failed"
        );
        counter!(
            MIRROR_ERRORS_REPORTED_TOTAL,
            ERROR_KIND_LABEL => format!("{:?}", error.kind()),
            TABLE_NAME_LABEL => task.table_name.clone(),
        )
        .increment(1);
    }
}
