use std::backtrace::{Backtrace, BacktraceStatus};
use std::sync::Arc;

use mirror::actions::LoadTask;
use mirror::error::SyncError;
use mirror::handler::{ErrorHandler, TracingErrorHandler};
use mirror_config::Environment;
use mirror_config::shared::SentryConfig;
use secrecy::ExposeSecret;
use sentry::protocol::{Event, Exception, Stacktrace};
use sentry::types::Uuid;
use tracing::info;

use crate::APP_VERSION_ENV_NAME;
use crate::error::{SyncerError, SyncerResult};

/// Initializes Sentry when `config` is set.
///
/// Panics are captured through the panic integration. Every event is tagged with
/// `service=mirror-syncer` and the app version, if known.
pub fn init(config: Option<&SentryConfig>) -> SyncerResult<Option<sentry::ClientInitGuard>> {
    let Some(config) = config else {
        info!("sentry not configured for mirror-syncer, skipping initialization");
        return Ok(None);
    };

    info!("initializing sentry with supplied dsn");

    let environment = Environment::load().map_err(SyncerError::config)?;
    let dsn = config
        .dsn
        .expose_secret()
        .parse()
        .map_err(SyncerError::config)?;

    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(dsn),
        environment: Some(environment.to_string().into()),
        integrations: vec![Arc::new(
            sentry::integrations::panic::PanicIntegration::new(),
        )],
        attach_stacktrace: true,
        ..Default::default()
    });

    let version = std::env::var(APP_VERSION_ENV_NAME);
    sentry::configure_scope(|scope| {
        scope.set_tag("service", "mirror-syncer");
        if let Ok(version) = version {
            scope.set_tag("version", version);
        }
    });

    Ok(Some(guard))
}

/// Captures an error that is not a sync error, those go through [`SentryErrorHandler`].
pub fn capture_error(err: &SyncerError) -> Option<Uuid> {
    if matches!(err, SyncerError::Sync(_)) {
        return None;
    }

    let mut exceptions = Vec::new();
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        exceptions.push(Exception {
            ty: type_name_from_debug(e),
            value: Some(e.to_string()),
            ..Default::default()
        });
        current = e.source();
    }
    // Root cause first.
    exceptions.reverse();
    attach_stacktrace(&mut exceptions, err.backtrace());

    Some(sentry::capture_event(Event {
        exception: exceptions.into(),
        level: sentry::Level::Error,
        ..Default::default()
    }))
}

/// [`ErrorHandler`] that logs like [`TracingErrorHandler`] and also sends every error to
/// Sentry.
///
/// Without an initialized Sentry client the capture calls are no-ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct SentryErrorHandler {
    tracing: TracingErrorHandler,
}

impl ErrorHandler for SentryErrorHandler {
    fn report(&self, error: &SyncError) {
        self.tracing.report(error);
        sentry::capture_event(event_from_sync_error(error));
    }

    fn notify_error(&self, task: &LoadTask, error: &SyncError) {
        self.tracing.notify_error(task, error);

        sentry::with_scope(
            |scope| {
                scope.set_tag("table", &task.table_name);
                scope.set_tag("source", &task.source);
                scope.set_tag("action", task.kind);
            },
            || sentry::capture_event(event_from_sync_error(error)),
        );
    }
}

fn event_from_sync_error(error: &SyncError) -> Event<'static> {
    let mut exceptions = vec![Exception {
        ty: format!("{:?}", error.kind()),
        value: Some(error.to_string()),
        ..Default::default()
    }];
    attach_stacktrace(&mut exceptions, error.backtrace());

    Event {
        exception: exceptions.into(),
        level: sentry::Level::Error,
        ..Default::default()
    }
}

fn attach_stacktrace(exceptions: &mut [Exception], backtrace: &Backtrace) {
    if let Some(stacktrace) = parse_backtrace(backtrace) {
        if let Some(exception) = exceptions.first_mut() {
            exception.stacktrace = Some(stacktrace);
        }
    }
}

fn parse_backtrace(backtrace: &Backtrace) -> Option<Stacktrace> {
    if backtrace.status() != BacktraceStatus::Captured {
        return None;
    }

    sentry::integrations::backtrace::parse_stacktrace(&backtrace.to_string())
}

/// Extracts the type name from an error's Debug representation, `"Error"` if there is none.
fn type_name_from_debug(err: &dyn std::error::Error) -> String {
    let debug = format!("{err:?}");
    debug
        .split(['{', '(', ' '])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("Error")
        .to_string()
}

#[cfg(test)]
mod tests {
    use mirror::error::ErrorKind;
    use mirror::sync_error;

    use super::*;

    #[test]
    fn sync_error_events_use_the_error_kind() {
        let err = sync_error!(ErrorKind::UnknownTable, "Unknown tables", "orders");

        let event = event_from_sync_error(&err);

        assert_eq!(event.exception.values.len(), 1);
        assert_eq!(event.exception.values[0].ty, "UnknownTable");
        assert_eq!(event.level, sentry::Level::Error);
    }

    #[test]
    fn type_names_are_read_from_debug_output() {
        let err = std::io::Error::other("boom");

        assert_eq!(type_name_from_debug(&err), "Custom");
    }

    #[test]
    fn sync_errors_are_not_captured_twice() {
        let err = SyncerError::from(sync_error!(ErrorKind::QueryFailed, "Query failed"));

        assert!(capture_error(&err).is_none());
    }
}
