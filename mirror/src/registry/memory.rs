use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::SyncResult;
use crate::registry::{Registry, TableSyncState};

#[derive(Debug, Default)]
struct Inner {
    storage_ready: bool,
    states: BTreeMap<String, TableSyncState>,
}

/// In-memory [`Registry`].
///
/// State is lost when the process exits. Useful for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn storage_ready(&self) -> bool {
        self.inner.lock().await.storage_ready
    }

    /// Returns every stored state ordered by table name.
    pub async fn table_states(&self) -> Vec<TableSyncState> {
        self.inner.lock().await.states.values().cloned().collect()
    }
}

impl Registry for MemoryRegistry {
    async fn ensure_storage_exists(&self) -> SyncResult<()> {
        self.inner.lock().await.storage_ready = true;

        Ok(())
    }

    async fn purge_except(&self, keep: &HashSet<String>) -> SyncResult<u64> {
        let mut inner = self.inner.lock().await;

        let before = inner.states.len();
        inner.states.retain(|table_name, _| keep.contains(table_name));

        Ok((before - inner.states.len()) as u64)
    }

    async fn table_state(&self, table_name: &str) -> SyncResult<Option<TableSyncState>> {
        let inner = self.inner.lock().await;

        Ok(inner.states.get(table_name).cloned())
    }

    async fn store_table_state(&self, state: TableSyncState) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.states.insert(state.table_name.clone(), state);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use mirror_config::shared::LoadActionKind;

    use super::*;

    fn state(table_name: &str) -> TableSyncState {
        TableSyncState {
            table_name: table_name.to_string(),
            source: "crm".to_string(),
            watermark: Some("2024-01-01 00:00:00+00".to_string()),
            last_action: LoadActionKind::Incremental,
            last_synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn purge_keeps_only_listed_tables() {
        let registry = MemoryRegistry::new();
        for table in ["accounts", "contacts", "legacy"] {
            registry.store_table_state(state(table)).await.unwrap();
        }
        let keep = HashSet::from(["accounts".to_string(), "contacts".to_string()]);

        let purged = registry.purge_except(&keep).await.unwrap();

        assert_eq!(purged, 1);
        assert!(registry.table_state("legacy").await.unwrap().is_none());
        assert_eq!(registry.table_states().await.len(), 2);
    }

    #[tokio::test]
    async fn storing_replaces_previous_state() {
        let registry = MemoryRegistry::new();
        registry.ensure_storage_exists().await.unwrap();
        registry.store_table_state(state("accounts")).await.unwrap();

        let mut newer = state("accounts");
        newer.watermark = Some("2024-02-01 00:00:00+00".to_string());
        registry.store_table_state(newer.clone()).await.unwrap();

        assert!(registry.storage_ready().await);
        assert_eq!(registry.table_state("accounts").await.unwrap(), Some(newer));
    }
}
