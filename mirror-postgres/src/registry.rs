use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mirror::error::{ErrorKind, SyncError, SyncResult};
use mirror::registry::{Registry, TableSyncState};
use mirror::sync_error;
use mirror_config::shared::{
    IntoConnectOptions, LoadActionKind, MIRROR_REGISTRY_OPTIONS, PgConnectionConfig,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info};

/// Maximum number of connections in the registry pool.
const MAX_POOL_CONNECTIONS: u32 = 2;

/// Duration after which idle connections are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

const CREATE_SCHEMA: &str = "create schema if not exists mirror";

const CREATE_TABLE: &str = r#"
    create table if not exists mirror.table_sync_state (
        table_name text primary key,
        source text not null,
        watermark text,
        last_action text not null,
        last_synced_at timestamptz not null
    )
"#;

const PURGE: &str = r#"
    delete from mirror.table_sync_state
    where not (table_name = any($1))
"#;

const SELECT_STATE: &str = r#"
    select table_name, source, watermark, last_action, last_synced_at
    from mirror.table_sync_state
    where table_name = $1
"#;

const UPSERT_STATE: &str = r#"
    insert into mirror.table_sync_state
        (table_name, source, watermark, last_action, last_synced_at)
    values ($1, $2, $3, $4, $5)
    on conflict (table_name) do update set
        source = excluded.source,
        watermark = excluded.watermark,
        last_action = excluded.last_action,
        last_synced_at = excluded.last_synced_at
"#;

#[derive(Debug, FromRow)]
struct TableSyncStateRow {
    table_name: String,
    source: String,
    watermark: Option<String>,
    last_action: String,
    last_synced_at: DateTime<Utc>,
}

impl TryFrom<TableSyncStateRow> for TableSyncState {
    type Error = SyncError;

    fn try_from(row: TableSyncStateRow) -> Result<Self, Self::Error> {
        let last_action = row.last_action.parse::<LoadActionKind>().map_err(|err| {
            sync_error!(
                ErrorKind::InvalidState,
                "Stored table state is invalid",
                format!("table {}", row.table_name),
                source: err
            )
        })?;

        Ok(TableSyncState {
            table_name: row.table_name,
            source: row.source,
            watermark: row.watermark,
            last_action,
            last_synced_at: row.last_synced_at,
        })
    }
}

/// [`Registry`] backed by the `mirror.table_sync_state` table of the target database.
#[derive(Debug, Clone)]
pub struct PostgresRegistry {
    pool: PgPool,
}

impl PostgresRegistry {
    /// Creates a registry with a lazily connected pool to `config`.
    pub fn new(config: &PgConnectionConfig) -> Self {
        let pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(MAX_POOL_CONNECTIONS)
            .idle_timeout(Some(IDLE_TIMEOUT))
            .connect_lazy_with(config.with_db(Some(&*MIRROR_REGISTRY_OPTIONS)));

        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl Registry for PostgresRegistry {
    async fn ensure_storage_exists(&self) -> SyncResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(CREATE_SCHEMA).execute(&mut *tx).await?;
        sqlx::query(CREATE_TABLE).execute(&mut *tx).await?;
        tx.commit().await?;

        debug!("registry storage ready");

        Ok(())
    }

    async fn purge_except(&self, keep: &HashSet<String>) -> SyncResult<u64> {
        let keep: Vec<&str> = keep.iter().map(String::as_str).collect();

        let result = sqlx::query(PURGE).bind(&keep).execute(&self.pool).await?;
        let purged = result.rows_affected();
        if purged > 0 {
            info!(purged, "removed registry entries of tables no longer synced");
        }

        Ok(purged)
    }

    async fn table_state(&self, table_name: &str) -> SyncResult<Option<TableSyncState>> {
        let row = sqlx::query_as::<_, TableSyncStateRow>(SELECT_STATE)
            .bind(table_name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TableSyncState::try_from).transpose()
    }

    async fn store_table_state(&self, state: TableSyncState) -> SyncResult<()> {
        sqlx::query(UPSERT_STATE)
            .bind(&state.table_name)
            .bind(&state.source)
            .bind(&state.watermark)
            .bind(state.last_action.as_static_str())
            .bind(state.last_synced_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn row(last_action: &str) -> TableSyncStateRow {
        TableSyncStateRow {
            table_name: "accounts".to_string(),
            source: "crm".to_string(),
            watermark: Some("2024-05-01 10:00:00+00".to_string()),
            last_action: last_action.to_string(),
            last_synced_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 5, 0).unwrap(),
        }
    }

    #[test]
    fn rows_convert_into_table_states() {
        let state = TableSyncState::try_from(row("incremental")).unwrap();

        assert_eq!(state.last_action, LoadActionKind::Incremental);
        assert_eq!(state.watermark.as_deref(), Some("2024-05-01 10:00:00+00"));
    }

    #[test]
    fn unknown_actions_are_invalid_state() {
        let err = TableSyncState::try_from(row("snapshot")).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(err.detail(), Some("table accounts"));
    }
}
