use std::collections::HashSet;
use std::future::Future;

use chrono::{DateTime, Utc};
use mirror_config::shared::LoadActionKind;

use crate::error::SyncResult;

/// What the registry knows about one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSyncState {
    pub table_name: String,
    pub source: String,
    /// Highest watermark value loaded so far, rendered as text.
    pub watermark: Option<String>,
    pub last_action: LoadActionKind,
    pub last_synced_at: DateTime<Utc>,
}

/// Storage of [`TableSyncState`]s.
///
/// Implementations must be safe for concurrent use, load actions of a threaded run share one
/// registry.
pub trait Registry: Clone + Send + Sync + 'static {
    /// Creates the backing storage if it does not exist yet. Idempotent.
    fn ensure_storage_exists(&self) -> impl Future<Output = SyncResult<()>> + Send;

    /// Removes the state of every table not in `keep` and returns how many were removed.
    fn purge_except(&self, keep: &HashSet<String>) -> impl Future<Output = SyncResult<u64>> + Send;

    fn table_state(
        &self,
        table_name: &str,
    ) -> impl Future<Output = SyncResult<Option<TableSyncState>>> + Send;

    /// Inserts or replaces the state of `state.table_name`.
    fn store_table_state(&self, state: TableSyncState) -> impl Future<Output = SyncResult<()>> + Send;
}
