//! Error types and result definitions for sync operations.
//!
//! [`SyncError`] carries a classified [`ErrorKind`], a static description, optional dynamic
//! detail, an optional source error and the callsite it was created at. Every kind belongs to
//! one [`ErrorClass`], which drives how the manager reacts to a failure.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for sync operations using [`SyncError`] as the error type.
pub type SyncResult<T> = Result<T, SyncError>;

/// SQLSTATE codes of `57P0x` errors raised when the server goes away.
const SERVER_SHUTDOWN_SQLSTATES: &[&str] = &["57P01", "57P02", "57P03"];

/// SQLSTATE class of connection exceptions.
const CONNECTION_EXCEPTION_SQLSTATE_CLASS: &str = "08";

/// SQLSTATE raised when the server has no connection slots left.
const TOO_MANY_CONNECTIONS_SQLSTATE: &str = "53300";

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for sync operations.
///
/// Cloning is cheap, the source and backtrace are shared.
#[derive(Debug, Clone)]
pub struct SyncError {
    payload: ErrorPayload,
}

/// Specific categories of errors that can occur while syncing tables.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Configuration & Plan Errors
    ConfigError,
    UnknownTable,

    // Query & Execution Errors
    QueryFailed,
    ExtractionFailed,
    MissingPrimaryKey,

    // Connectivity Errors
    InfrastructureUnavailable,

    // Data & Transformation Errors
    ConversionError,
    InvalidData,
    SerializationError,
    DeserializationError,

    // IO Errors
    IoError,

    // State & Workflow Errors
    InvalidState,
    LoadActionPanic,
    TableLoadsFailed,

    // Unknown / Uncategorized
    Unknown,
}

/// How the sync loop treats an error of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Ends the current run immediately.
    Fatal,
    /// Expected to go away on its own, the incremental loop retries it.
    Transient,
    /// Summary of several table failures that were already reported one by one.
    Aggregate,
}

impl ErrorKind {
    /// Returns the [`ErrorClass`] of this kind.
    ///
    /// Keep the transient list narrow: only failures that recover without operator
    /// intervention belong there.
    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorKind::ExtractionFailed | ErrorKind::InfrastructureUnavailable => {
                ErrorClass::Transient
            }
            ErrorKind::TableLoadsFailed => ErrorClass::Aggregate,
            _ => ErrorClass::Fatal,
        }
    }
}

impl SyncError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.payload.kind
    }

    /// Returns the [`ErrorClass`] of this error's kind.
    pub fn class(&self) -> ErrorClass {
        self.payload.kind.class()
    }

    /// Returns `true` when the incremental loop may retry after this error.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        &self.payload.description
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        self.payload.detail.as_deref()
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> &Backtrace {
        self.payload.backtrace.as_ref()
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.payload.location
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    ///
    /// The stored source is preserved across clones and exposed via [`error::Error::source`].
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.payload.source = Some(Arc::new(source));
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        SyncError {
            payload: ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            },
        }
    }
}

impl PartialEq for SyncError {
    fn eq(&self, other: &SyncError) -> bool {
        self.payload.kind == other.payload.kind
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let payload = &self.payload;
        let location = payload.location;
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            payload.kind,
            payload.description,
            location.file(),
            location.line(),
            location.column()
        )?;

        write_detail(payload.detail.as_deref(), f, 1)?;
        write_backtrace(payload.backtrace.as_ref(), f, 1)?;

        Ok(())
    }
}

impl error::Error for SyncError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.payload
            .source
            .as_ref()
            .map(|source| source as &(dyn error::Error + 'static))
    }
}

fn write_backtrace(
    backtrace: &Backtrace,
    f: &mut fmt::Formatter<'_>,
    indent: usize,
) -> fmt::Result {
    let indent_str = "  ".repeat(indent);

    let rendered_backtrace = format!("{backtrace}");
    if !rendered_backtrace.trim().is_empty() {
        write!(f, "\n{indent_str}Backtrace:")?;
        for line in rendered_backtrace.lines() {
            if line.trim().is_empty() {
                write!(f, "\n{indent_str}  ")?;
            } else {
                write!(f, "\n{indent_str}  {line}")?;
            }
        }
    }

    Ok(())
}

fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    if let Some(detail) = detail {
        let indent_str = "  ".repeat(indent);
        if detail.trim().is_empty() {
            write!(f, "\n{indent_str}Detail: <empty>")?;
        } else {
            write!(f, "\n{indent_str}Detail:")?;
            for line in detail.lines() {
                if line.trim().is_empty() {
                    write!(f, "\n{indent_str}  ")?;
                } else {
                    write!(f, "\n{indent_str}  {line}")?;
                }
            }
        }
    }

    Ok(())
}

/// Creates a [`SyncError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for SyncError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> SyncError {
        SyncError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`SyncError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for SyncError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> SyncError {
        SyncError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Converts [`std::io::Error`] to [`SyncError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for SyncError {
    #[track_caller]
    fn from(err: std::io::Error) -> SyncError {
        let detail = err.to_string();
        SyncError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`serde_json::Error`] to [`SyncError`] with the appropriate error kind.
impl From<serde_json::Error> for SyncError {
    #[track_caller]
    fn from(err: serde_json::Error) -> SyncError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        SyncError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`chrono::ParseError`] to [`SyncError`] with [`ErrorKind::ConversionError`].
impl From<chrono::ParseError> for SyncError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> SyncError {
        let detail = err.to_string();
        SyncError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("Datetime parsing failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`sqlx::Error`] to [`SyncError`] with the appropriate error kind.
///
/// Lost connections, exhausted pools and server shutdowns map to
/// [`ErrorKind::InfrastructureUnavailable`] so that the incremental loop retries them.
impl From<sqlx::Error> for SyncError {
    #[track_caller]
    fn from(err: sqlx::Error) -> SyncError {
        let (kind, description) = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => (
                ErrorKind::InfrastructureUnavailable,
                "Database connection unavailable",
            ),
            sqlx::Error::Database(db_err) => match db_err.code() {
                Some(code) if is_unavailable_sqlstate(&code) => (
                    ErrorKind::InfrastructureUnavailable,
                    "Database server unavailable",
                ),
                _ => (ErrorKind::QueryFailed, "Database operation failed"),
            },
            sqlx::Error::Configuration(_) => {
                (ErrorKind::ConfigError, "Database configuration invalid")
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                (ErrorKind::ConversionError, "Database value decoding failed")
            }
            _ => (ErrorKind::QueryFailed, "Database operation failed"),
        };

        let detail = err.to_string();
        SyncError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

fn is_unavailable_sqlstate(code: &str) -> bool {
    code.starts_with(CONNECTION_EXCEPTION_SQLSTATE_CLASS)
        || code == TOO_MANY_CONNECTIONS_SQLSTATE
        || SERVER_SHUTDOWN_SQLSTATES.contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_error;

    #[test]
    fn only_extraction_and_infrastructure_failures_are_transient() {
        let transient = [
            ErrorKind::ExtractionFailed,
            ErrorKind::InfrastructureUnavailable,
        ];
        let others = [
            ErrorKind::ConfigError,
            ErrorKind::UnknownTable,
            ErrorKind::QueryFailed,
            ErrorKind::MissingPrimaryKey,
            ErrorKind::InvalidData,
            ErrorKind::IoError,
            ErrorKind::InvalidState,
            ErrorKind::LoadActionPanic,
            ErrorKind::TableLoadsFailed,
            ErrorKind::Unknown,
        ];

        for kind in transient {
            assert_eq!(kind.class(), ErrorClass::Transient);
        }
        for kind in others {
            assert_ne!(kind.class(), ErrorClass::Transient);
        }
        assert_eq!(ErrorKind::TableLoadsFailed.class(), ErrorClass::Aggregate);
    }

    #[test]
    fn display_contains_kind_description_and_detail() {
        let err = sync_error!(ErrorKind::UnknownTable, "Unknown table", "orders, invoices");
        let rendered = err.to_string();

        assert!(rendered.starts_with("[UnknownTable] Unknown table @ "));
        assert!(rendered.contains("Detail:\n    orders, invoices"));
        assert_eq!(err.detail(), Some("orders, invoices"));
    }

    #[test]
    fn source_is_preserved_across_clones() {
        let io = std::io::Error::other("socket closed");
        let err = sync_error!(ErrorKind::ExtractionFailed, "Extraction failed").with_source(io);
        let cloned = err.clone();

        let source = error::Error::source(&cloned).unwrap();
        assert_eq!(source.to_string(), "socket closed");
        assert!(cloned.is_transient());
    }

    #[test]
    fn pool_timeouts_are_infrastructure_failures() {
        let err: SyncError = sqlx::Error::PoolTimedOut.into();

        assert_eq!(err.kind(), ErrorKind::InfrastructureUnavailable);
        assert!(err.is_transient());
    }

    #[test]
    fn unavailable_sqlstates() {
        assert!(is_unavailable_sqlstate("08006"));
        assert!(is_unavailable_sqlstate("57P01"));
        assert!(is_unavailable_sqlstate("53300"));
        assert!(!is_unavailable_sqlstate("42P01"));
        assert!(!is_unavailable_sqlstate("57014"));
    }

    #[test]
    fn errors_compare_by_kind() {
        let a = sync_error!(ErrorKind::QueryFailed, "a");
        let b = sync_error!(ErrorKind::QueryFailed, "b", "detail");

        assert_eq!(a, b);
        assert_ne!(a, sync_error!(ErrorKind::IoError, "a"));
    }
}
