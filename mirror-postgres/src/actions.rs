//! Load actions moving rows between Postgres databases.
//!
//! Rows travel as JSON: the source renders each row with `row_to_json` and the target expands
//! batches of rows with `json_populate_recordset`. Source and target tables therefore share
//! their name and column names, columns missing on either side are ignored or left null.
//!
//! Every action writes its rows in a single target transaction and records the table state in
//! the registry once that transaction committed.

use chrono::{DateTime, TimeDelta, Utc};
use metrics::counter;
use mirror::actions::{LoadAction, LoadActionFactory, LoadContext, LoadTask};
use mirror::error::{ErrorKind, SyncError, SyncResult};
use mirror::metrics::{ACTION_LABEL, MIRROR_ROWS_LOADED_TOTAL, TABLE_NAME_LABEL};
use mirror::registry::{Registry, TableSyncState};
use mirror::{bail, sync_error};
use mirror_config::shared::{LoadActionKind, LoadConfig};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};

use crate::catalog;
use crate::connection::PgConnection;
use crate::sql::{self, QualifiedTable, RowFilter};

/// Builds [`PgLoadAction`]s.
#[derive(Debug, Clone)]
pub struct PgLoadActionFactory {
    max_batch_size: usize,
    recent_window: TimeDelta,
}

impl PgLoadActionFactory {
    pub fn new(config: &LoadConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size,
            recent_window: TimeDelta::hours(i64::from(config.recent_window_hours)),
        }
    }
}

impl<R> LoadActionFactory<PgConnection, R> for PgLoadActionFactory
where
    R: Registry,
{
    type Action = PgLoadAction<R>;

    fn create(
        &self,
        kind: LoadActionKind,
        context: LoadContext<PgConnection, R>,
    ) -> SyncResult<PgLoadAction<R>> {
        let table = TableLoad {
            task: LoadTask::new(&context.spec, kind),
            table: QualifiedTable::parse(&context.spec.table_name),
            context,
            max_batch_size: self.max_batch_size,
            recent_window: self.recent_window,
            extracted: Extracted::default(),
            batches: Vec::new(),
        };

        Ok(match kind {
            LoadActionKind::Batch => PgLoadAction::Batch(table),
            LoadActionKind::Incremental => PgLoadAction::Incremental(table),
            LoadActionKind::RefreshRecent => PgLoadAction::RefreshRecent(table),
        })
    }
}

/// Load action of one table.
#[derive(Debug)]
pub enum PgLoadAction<R> {
    /// Replaces every target row with the source rows.
    Batch(TableLoad<R>),
    /// Upserts the source rows changed since the recorded watermark.
    Incremental(TableLoad<R>),
    /// Replaces the target rows inside the recent window with the source ones.
    RefreshRecent(TableLoad<R>),
}

impl<R> PgLoadAction<R> {
    fn table_load(&self) -> &TableLoad<R> {
        match self {
            PgLoadAction::Batch(load)
            | PgLoadAction::Incremental(load)
            | PgLoadAction::RefreshRecent(load) => load,
        }
    }

    fn table_load_mut(&mut self) -> &mut TableLoad<R> {
        match self {
            PgLoadAction::Batch(load)
            | PgLoadAction::Incremental(load)
            | PgLoadAction::RefreshRecent(load) => load,
        }
    }
}

impl<R> LoadAction for PgLoadAction<R>
where
    R: Registry,
{
    fn task(&self) -> &LoadTask {
        &self.table_load().task
    }

    async fn extract(&mut self) -> SyncResult<()> {
        let result = match self {
            PgLoadAction::Batch(load) => load.extract_all().await,
            PgLoadAction::Incremental(load) => load.extract_changed().await,
            PgLoadAction::RefreshRecent(load) => load.extract_recent().await,
        };

        result.map_err(|err| extraction_failed(self.task(), err))
    }

    async fn transform(&mut self) -> SyncResult<()> {
        let load = self.table_load_mut();
        let rows = std::mem::take(&mut load.extracted.rows);
        load.batches = into_batches(rows, load.max_batch_size)?;

        Ok(())
    }

    async fn load(&mut self) -> SyncResult<()> {
        match self {
            PgLoadAction::Batch(load) => load.replace_all().await,
            PgLoadAction::Incremental(load) => load.upsert_changed().await,
            PgLoadAction::RefreshRecent(load) => load.replace_recent().await,
        }
    }
}

/// What the extract stage hands to the later stages.
#[derive(Debug, Default)]
struct Extracted {
    /// One JSON object per row.
    rows: Vec<String>,
    row_count: usize,
    /// Watermark to record once the rows are loaded.
    watermark: Option<String>,
    /// Start of the refreshed window.
    cutoff: Option<DateTime<Utc>>,
}

/// State shared by every kind of [`PgLoadAction`].
pub struct TableLoad<R> {
    task: LoadTask,
    table: QualifiedTable,
    context: LoadContext<PgConnection, R>,
    max_batch_size: usize,
    recent_window: TimeDelta,
    extracted: Extracted,
    /// JSON arrays of at most `max_batch_size` rows.
    batches: Vec<String>,
}

impl<R> std::fmt::Debug for TableLoad<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableLoad")
            .field("task", &self.task)
            .field("rows", &self.extracted.row_count)
            .field("batches", &self.batches.len())
            .finish_non_exhaustive()
    }
}

impl<R> TableLoad<R>
where
    R: Registry,
{
    fn source(&self) -> &PgPool {
        self.context.source.pool()
    }

    fn target(&self) -> &PgPool {
        self.context.target.pool()
    }

    async fn recorded_watermark(&self) -> SyncResult<Option<String>> {
        let state = self
            .context
            .registry
            .table_state(&self.task.table_name)
            .await?;

        Ok(state.and_then(|state| state.watermark))
    }

    async fn extract_all(&mut self) -> SyncResult<()> {
        let column = self.context.spec.watermark_column.as_str();
        if catalog::column_type(self.source(), &self.table, column)
            .await?
            .is_some()
        {
            self.extracted.watermark =
                catalog::max_value(self.source(), &self.table, column).await?;
        }

        let query = sql::select_rows(&self.table, &RowFilter::All);
        let rows = sqlx::query_scalar::<_, String>(&query)
            .fetch_all(self.source())
            .await?;

        self.set_rows(rows);

        Ok(())
    }

    async fn extract_changed(&mut self) -> SyncResult<()> {
        let column = self.context.spec.watermark_column.as_str();
        let Some(column_type) = catalog::column_type(self.source(), &self.table, column).await?
        else {
            bail!(
                ErrorKind::InvalidData,
                "Watermark column not found",
                format!("table {} has no column {column}", self.table)
            );
        };

        let recorded = self.recorded_watermark().await?;
        let Some(until) = catalog::max_value(self.source(), &self.table, column).await? else {
            debug!(table = %self.table, "source table is empty");
            self.extracted.watermark = recorded;
            self.set_rows(Vec::new());

            return Ok(());
        };

        let filter = RowFilter::Watermark {
            column,
            column_type: &column_type,
            bounded_below: recorded.is_some(),
        };
        let query = sql::select_rows(&self.table, &filter);
        let mut rows_query = sqlx::query_scalar::<_, String>(&query);
        if let Some(recorded) = &recorded {
            rows_query = rows_query.bind(recorded.as_str());
        }
        let rows = rows_query
            .bind(until.as_str())
            .fetch_all(self.source())
            .await?;

        debug!(
            table = %self.table,
            from = ?recorded,
            until = %until,
            rows = rows.len(),
            "extracted changed rows"
        );

        self.extracted.watermark = Some(until);
        self.set_rows(rows);

        Ok(())
    }

    async fn extract_recent(&mut self) -> SyncResult<()> {
        let cutoff = self.context.clock.now() - self.recent_window;
        let column = self.context.spec.recent_window_column();

        let query = sql::select_rows(&self.table, &RowFilter::Since { column });
        let rows = sqlx::query_scalar::<_, String>(&query)
            .bind(cutoff)
            .fetch_all(self.source())
            .await?;

        self.extracted.watermark = self.recorded_watermark().await?;
        self.extracted.cutoff = Some(cutoff);
        self.set_rows(rows);

        Ok(())
    }

    fn set_rows(&mut self, rows: Vec<String>) {
        self.extracted.row_count = rows.len();
        self.extracted.rows = rows;
    }

    async fn replace_all(&mut self) -> SyncResult<()> {
        let mut tx = self.target().begin().await?;
        sqlx::query(&sql::truncate(&self.table))
            .execute(&mut *tx)
            .await?;
        self.write_batches(&mut tx, &sql::insert_json(&self.table))
            .await?;
        tx.commit().await?;

        self.finish().await
    }

    async fn upsert_changed(&mut self) -> SyncResult<()> {
        if self.batches.is_empty() {
            return self.finish().await;
        }

        let primary_key = catalog::primary_key(self.target(), &self.table).await?;
        if primary_key.is_empty() {
            bail!(
                ErrorKind::MissingPrimaryKey,
                "Target table has no primary key",
                format!("table {} cannot be loaded incrementally", self.table)
            );
        }
        let columns = catalog::table_columns(self.target(), &self.table).await?;
        let statement = sql::upsert_json(&self.table, &columns, &primary_key);

        let mut tx = self.target().begin().await?;
        self.write_batches(&mut tx, &statement).await?;
        tx.commit().await?;

        self.finish().await
    }

    async fn replace_recent(&mut self) -> SyncResult<()> {
        let Some(cutoff) = self.extracted.cutoff else {
            bail!(
                ErrorKind::InvalidState,
                "Recent rows were not extracted",
                self.task.to_string()
            );
        };
        let column = self.context.spec.recent_window_column();

        let mut tx = self.target().begin().await?;
        let deleted = sqlx::query(&sql::delete_since(&self.table, column))
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        self.write_batches(&mut tx, &sql::insert_json(&self.table))
            .await?;
        tx.commit().await?;

        debug!(table = %self.table, %cutoff, deleted, "replaced recent rows");

        self.finish().await
    }

    async fn write_batches(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        statement: &str,
    ) -> SyncResult<()> {
        for batch in &self.batches {
            sqlx::query(statement)
                .bind(batch.as_str())
                .execute(&mut **tx)
                .await?;
        }

        Ok(())
    }

    /// Records the table state and the loaded rows.
    async fn finish(&mut self) -> SyncResult<()> {
        let state = TableSyncState {
            table_name: self.task.table_name.clone(),
            source: self.task.source.clone(),
            watermark: self.extracted.watermark.take(),
            last_action: self.task.kind,
            last_synced_at: self.context.clock.now(),
        };
        self.context.registry.store_table_state(state).await?;

        let rows = self.extracted.row_count;
        counter!(
            MIRROR_ROWS_LOADED_TOTAL,
            TABLE_NAME_LABEL => self.task.table_name.clone(),
            ACTION_LABEL => self.task.kind.as_static_str(),
        )
        .increment(rows as u64);
        info!(
            table = %self.task.table_name,
            action = %self.task.kind,
            rows,
            batches = self.batches.len(),
            "table loaded"
        );

        Ok(())
    }
}

/// Groups JSON rows into JSON arrays of at most `max_batch_size` rows.
///
/// Fails with [`ErrorKind::InvalidData`] when a row is not a JSON object.
fn into_batches(rows: Vec<String>, max_batch_size: usize) -> SyncResult<Vec<String>> {
    let mut batches = Vec::with_capacity(rows.len().div_ceil(max_batch_size.max(1)));
    for chunk in rows.chunks(max_batch_size.max(1)) {
        let mut values = Vec::with_capacity(chunk.len());
        for row in chunk {
            let value: Value = serde_json::from_str(row)?;
            if !value.is_object() {
                bail!(
                    ErrorKind::InvalidData,
                    "Source row is not a JSON object",
                    row.clone()
                );
            }
            values.push(value);
        }

        batches.push(serde_json::to_string(&values)?);
    }

    Ok(batches)
}

/// Turns a failure of the extract stage into a transient one.
///
/// Errors that are already transient are kept as they are.
fn extraction_failed(task: &LoadTask, err: SyncError) -> SyncError {
    if err.is_transient() {
        return err;
    }

    sync_error!(
        ErrorKind::ExtractionFailed,
        "Failed to extract rows",
        task.to_string(),
        source: err
    )
}
