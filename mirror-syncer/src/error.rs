use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use mirror::error::SyncError;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

pub type SyncerResult<T> = Result<T, SyncerError>;

/// Backtrace captured when a non sync error is created.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type of the syncer binary.
#[derive(Debug)]
pub enum SyncerError {
    /// A sync run failed. Already reported through the error handler.
    Sync(SyncError),
    /// Configuration could not be loaded or is invalid.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    Io(std::io::Error, CapturedBacktrace),
}

impl SyncerError {
    pub fn category(&self) -> &'static str {
        match self {
            SyncerError::Sync(_) => "sync error",
            SyncerError::Config(_, _) => "configuration error",
            SyncerError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> &Backtrace {
        match self {
            SyncerError::Sync(err) => err.backtrace(),
            SyncerError::Config(_, captured) => &captured.0,
            SyncerError::Io(_, captured) => &captured.0,
        }
    }

    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        SyncerError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a report of the error and its causes for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("mirror-syncer failed\n");
        out.push_str(&format!("category: {}\n", self.category()));

        // Sync errors render their own detail and backtrace.
        if let SyncerError::Sync(err) = self {
            out.push_str(&format!("error: {err}\n"));
            return out;
        }

        out.push_str(&format!("error: {self}\n"));
        let mut source = Error::source(self);
        let mut index = 1usize;
        while let Some(err) = source {
            out.push_str(&format!("cause {index}: {err}\n"));
            source = err.source();
            index += 1;
        }

        if should_render_backtrace() {
            out.push_str("backtrace:\n");
            out.push_str(&self.backtrace().to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for SyncerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncerError::Sync(err) => write!(f, "{err}"),
            SyncerError::Config(source, _) => write!(f, "configuration error: {source}"),
            SyncerError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for SyncerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SyncerError::Sync(err) => err.source(),
            SyncerError::Config(source, _) => Some(source.as_ref()),
            SyncerError::Io(source, _) => Some(source),
        }
    }
}

impl From<std::io::Error> for SyncerError {
    fn from(err: std::io::Error) -> Self {
        SyncerError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<SyncError> for SyncerError {
    fn from(err: SyncError) -> Self {
        SyncerError::Sync(err)
    }
}

#[cfg(test)]
mod tests {
    use mirror::error::ErrorKind;
    use mirror::sync_error;
    use mirror_config::shared::ValidationError;

    use super::*;

    #[test]
    fn config_report_lists_causes() {
        let err = SyncerError::config(ValidationError::UnknownPlanSource("crm".to_string()));

        let report = err.render_report();

        assert!(report.contains("category: configuration error"));
        assert!(report.contains("error: configuration error: sync plan references unknown source `crm`"));
        assert!(report.contains("cause 1: sync plan references unknown source `crm`"));
    }

    #[test]
    fn sync_errors_keep_their_rendering() {
        let err: SyncerError =
            sync_error!(ErrorKind::TableLoadsFailed, "One or more table loads failed").into();

        let report = err.render_report();

        assert!(report.contains("category: sync error"));
        assert!(report.contains("One or more table loads failed"));
        assert!(!report.contains("cause 1"));
    }
}
