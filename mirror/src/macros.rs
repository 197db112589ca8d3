//! Shorthands for building [`crate::error::SyncError`]s.

/// Builds a [`crate::error::SyncError`].
///
/// Takes a kind and a static description, then optionally a detail and a trailing
/// `source: err`. A bare detail expression goes through `to_string()`; `detail = value`
/// hands the value over as is, which avoids a copy for owned strings.
///
/// ```ignore
/// sync_error!(ErrorKind::UnknownTable, "Unknown tables", names.join(", "));
/// sync_error!(ErrorKind::ExtractionFailed, "Failed to extract rows", source: err);
/// ```
#[macro_export]
macro_rules! sync_error {
    ($kind:expr, $desc:expr $(, source: $source:expr)?) => {{
        let err = $crate::error::SyncError::from(($kind, $desc));
        $(let err = err.with_source($source);)?
        err
    }};
    ($kind:expr, $desc:expr, detail = $detail:expr $(, source: $source:expr)?) => {{
        let err = $crate::error::SyncError::from(($kind, $desc, $detail));
        $(let err = err.with_source($source);)?
        err
    }};
    ($kind:expr, $desc:expr, $detail:expr $(, source: $source:expr)?) => {{
        let err = $crate::error::SyncError::from(($kind, $desc, $detail.to_string()));
        $(let err = err.with_source($source);)?
        err
    }};
}

/// Returns early with a [`crate::error::SyncError`] built by [`sync_error!`] from the same
/// arguments.
#[macro_export]
macro_rules! bail {
    ($($args:tt)+) => {
        return ::core::result::Result::Err($crate::sync_error!($($args)+))
    };
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use crate::error::{ErrorKind, SyncResult};

    fn lookup(table: &str) -> SyncResult<()> {
        let io = std::io::Error::other("connection reset");
        bail!(ErrorKind::UnknownTable, "Unknown table", table, source: io)
    }

    #[test]
    fn bail_keeps_detail_and_source() {
        let err = lookup("orders").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnknownTable);
        assert_eq!(err.detail(), Some("orders"));
        assert_eq!(err.source().unwrap().to_string(), "connection reset");
    }

    #[test]
    fn owned_detail_is_moved() {
        let detail = String::from("accounts, invoices");

        let err = sync_error!(ErrorKind::TableLoadsFailed, "Loads failed", detail = detail);

        assert_eq!(err.detail(), Some("accounts, invoices"));
        assert!(err.source().is_none());
    }
}
