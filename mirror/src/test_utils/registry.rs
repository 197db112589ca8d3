use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::registry::memory::MemoryRegistry;
use crate::registry::{Registry, TableSyncState};
use crate::sync_error;

#[derive(Debug, Default)]
struct Calls {
    ensure_storage: usize,
    purges: Vec<HashSet<String>>,
    ensure_storage_failures: usize,
    purge_failures: usize,
}

/// [`MemoryRegistry`] that also records maintenance calls.
#[derive(Debug, Clone, Default)]
pub struct RecordingRegistry {
    registry: MemoryRegistry,
    calls: Arc<Mutex<Calls>>,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `times` storage checks with [`ErrorKind::InfrastructureUnavailable`].
    pub fn fail_ensure_storage(self, times: usize) -> Self {
        self.calls.lock().unwrap().ensure_storage_failures = times;
        self
    }

    /// Fails the next `times` purges with [`ErrorKind::InfrastructureUnavailable`].
    pub fn fail_purges(self, times: usize) -> Self {
        self.calls.lock().unwrap().purge_failures = times;
        self
    }

    pub fn ensure_storage_calls(&self) -> usize {
        self.calls.lock().unwrap().ensure_storage
    }

    /// The `keep` set of every purge call, failed ones included, in call order.
    pub fn purges(&self) -> Vec<HashSet<String>> {
        self.calls.lock().unwrap().purges.clone()
    }
}

impl Registry for RecordingRegistry {
    async fn ensure_storage_exists(&self) -> SyncResult<()> {
        {
            let mut calls = self.calls.lock().unwrap();
            calls.ensure_storage += 1;
            if calls.ensure_storage_failures > 0 {
                calls.ensure_storage_failures -= 1;
                return Err(unavailable());
            }
        }

        self.registry.ensure_storage_exists().await
    }

    async fn purge_except(&self, keep: &HashSet<String>) -> SyncResult<u64> {
        {
            let mut calls = self.calls.lock().unwrap();
            calls.purges.push(keep.clone());
            if calls.purge_failures > 0 {
                calls.purge_failures -= 1;
                return Err(unavailable());
            }
        }

        self.registry.purge_except(keep).await
    }

    async fn table_state(&self, table_name: &str) -> SyncResult<Option<TableSyncState>> {
        self.registry.table_state(table_name).await
    }

    async fn store_table_state(&self, state: TableSyncState) -> SyncResult<()> {
        self.registry.store_table_state(state).await
    }
}

fn unavailable() -> SyncError {
    sync_error!(
        ErrorKind::InfrastructureUnavailable,
        "Registry database unavailable"
    )
}
