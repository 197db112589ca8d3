//! Orchestration of sync runs.
//!
//! [`SyncManager`] is the entry point of the crate. It resolves the table plan, builds load
//! actions and runs them through a [`Pipeline`]:
//!
//! - batch and refresh-recent runs execute every table concurrently and report each failed
//!   table before raising one aggregate error;
//! - the incremental loop executes tables one after the other, aborts a cycle on the first
//!   failure and retries transient failures up to [`MAX_CONSECUTIVE_TRANSIENT_FAILURES`]
//!   times in a row.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use mirror_config::shared::{LoadActionKind, SyncConfig, SyncPlanConfig};
use tracing::{debug, error, info, warn};

use crate::actions::{LOAD_STAGES, LoadActionFactory, LoadContext};
use crate::bail;
use crate::clock::{Clock, SystemClock};
use crate::concurrency::stop::StopHandle;
use crate::connection::{ConnectionCache, ConnectionFactory};
use crate::error::{ErrorKind, SyncResult};
use crate::handler::ErrorHandler;
use crate::metrics::{
    MIRROR_INCREMENTAL_CYCLES_TOTAL, MIRROR_REGISTRY_PURGED_TOTAL, MIRROR_TRANSIENT_RETRIES_TOTAL,
    measure,
};
use crate::pipeline::{ExecutionContext, Pipeline, PipelineResult};
use crate::plan::{TableLoadSpec, TableSelection, resolve_table_plan, select_tables};
use crate::registry::Registry;

/// Number of transient cycle failures in a row after which the incremental loop gives up.
pub const MAX_CONSECUTIVE_TRANSIENT_FAILURES: u32 = 10;

/// The registry is purged on the first incremental cycle and every this many cycles after it.
///
/// A purge that fails is attempted again on the next cycle.
pub const REGISTRY_PURGE_INTERVAL: u64 = 100;

/// Mutable state of a sync session.
///
/// The table plan is resolved once and kept for the lifetime of the manager. Source
/// connections are dropped before every incremental cycle so that endpoint changes are picked
/// up; the target connection lives until [`SyncManager::shutdown`].
struct SessionState<F: ConnectionFactory> {
    connections: ConnectionCache<F>,
    plan: Option<Vec<TableLoadSpec>>,
    cycle: u64,
    /// Set once the registry storage was ensured by an incremental cycle.
    storage_ready: bool,
    /// Set when a registry purge is due, cleared once one succeeds.
    purge_due: bool,
}

pub struct SyncManager<F, R, A, H>
where
    F: ConnectionFactory,
{
    plans: Vec<SyncPlanConfig>,
    extra_tables: Vec<String>,
    incremental_action: LoadActionKind,
    registry: R,
    actions: A,
    handler: H,
    clock: Arc<dyn Clock>,
    stop: StopHandle,
    state: SessionState<F>,
}

impl<F, R, A, H> SyncManager<F, R, A, H>
where
    F: ConnectionFactory,
    R: Registry,
    A: LoadActionFactory<F::Connection, R>,
    H: ErrorHandler,
{
    pub fn new(
        config: SyncConfig,
        connection_factory: F,
        registry: R,
        actions: A,
        handler: H,
    ) -> Self {
        let SyncConfig {
            target,
            sources,
            plans,
            extra_tables,
            incremental_action,
            ..
        } = config;

        Self {
            plans,
            extra_tables,
            incremental_action,
            registry,
            actions,
            handler,
            clock: Arc::new(SystemClock),
            stop: StopHandle::new(),
            state: SessionState {
                connections: ConnectionCache::new(connection_factory, target, sources),
                plan: None,
                cycle: 0,
                storage_ready: false,
                purge_due: false,
            },
        }
    }

    /// Replaces the clock handed to load actions.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns a handle that stops the incremental loop from anywhere.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Requests the incremental loop to return after its current cycle.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Number of incremental cycles started so far.
    pub fn cycle(&self) -> u64 {
        self.state.cycle
    }

    /// Reloads the selected tables, then refreshes their recent rows.
    ///
    /// Every table is attempted. Failed tables are reported one by one and the run then fails
    /// with [`ErrorKind::TableLoadsFailed`]; the refresh-recent pass only runs when every batch
    /// load succeeded.
    pub async fn batch(&mut self, selection: &TableSelection) -> SyncResult<()> {
        let handler = self.handler.clone();
        handler.wrap(self.run_batch(selection)).await
    }

    /// Reloads the recent rows of the selected tables. Same failure policy as
    /// [`SyncManager::batch`].
    pub async fn refresh_recent(&mut self, selection: &TableSelection) -> SyncResult<()> {
        let handler = self.handler.clone();
        handler.wrap(self.run_refresh_recent(selection)).await
    }

    /// Runs incremental cycles until a stop is requested.
    ///
    /// Returns `Ok(())` once a stop was observed between two cycles. Returns the error of a
    /// cycle when it is not transient, or when it is the
    /// [`MAX_CONSECUTIVE_TRANSIENT_FAILURES`]th transient failure in a row.
    pub async fn increment(&mut self) -> SyncResult<()> {
        let handler = self.handler.clone();
        handler.wrap(self.run_incremental_loop()).await
    }

    /// Closes every connection of the session.
    pub async fn shutdown(&mut self) {
        self.state.connections.close_all().await;
    }

    async fn run_batch(&mut self, selection: &TableSelection) -> SyncResult<()> {
        self.registry.ensure_storage_exists().await?;

        let specs = self.selected_specs(selection, LoadActionKind::Batch).await?;
        info!(tables = specs.len(), "starting batch load");

        let results = measure(
            "batch",
            self.run_actions(LoadActionKind::Batch, specs, ExecutionContext::Threaded),
        )
        .await?;
        self.collect_and_report(results)?;

        self.run_refresh_recent(selection).await
    }

    async fn run_refresh_recent(&mut self, selection: &TableSelection) -> SyncResult<()> {
        self.registry.ensure_storage_exists().await?;

        let specs = self
            .selected_specs(selection, LoadActionKind::RefreshRecent)
            .await?;
        info!(tables = specs.len(), "starting refresh of recent rows");

        let results = measure(
            "refresh_recent",
            self.run_actions(
                LoadActionKind::RefreshRecent,
                specs,
                ExecutionContext::Threaded,
            ),
        )
        .await?;

        self.collect_and_report(results)
    }

    async fn run_incremental_loop(&mut self) -> SyncResult<()> {
        info!(action = %self.incremental_action, "starting incremental loop");

        let mut consecutive_failures = 0;
        while !self.stop.is_stopped() {
            self.state.connections.invalidate_sources().await;
            self.state.cycle += 1;
            let cycle = self.state.cycle;

            let outcome = self.run_incremental_cycle(cycle).await;
            counter!(MIRROR_INCREMENTAL_CYCLES_TOTAL).increment(1);

            match outcome {
                Ok(()) => {
                    consecutive_failures = 0;
                }
                Err(err) if self.handler.is_transient(&err) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_CONSECUTIVE_TRANSIENT_FAILURES {
                        error!(
                            cycle,
                            consecutive_failures,
                            "too many consecutive transient failures, giving up"
                        );

                        return Err(err);
                    }

                    warn!(
                        cycle,
                        consecutive_failures,
                        error = %err,
                        "incremental cycle failed with a transient error, retrying"
                    );
                    counter!(MIRROR_TRANSIENT_RETRIES_TOTAL).increment(1);
                }
                Err(err) => return Err(err),
            }
        }

        info!(cycles = self.state.cycle, "incremental loop stopped");

        Ok(())
    }

    async fn run_incremental_cycle(&mut self, cycle: u64) -> SyncResult<()> {
        debug!(cycle, "starting incremental cycle");

        if !self.state.storage_ready {
            self.registry.ensure_storage_exists().await?;
            self.state.storage_ready = true;
        }

        // A purge that failed stays due until a later cycle succeeds with it.
        if (cycle - 1) % REGISTRY_PURGE_INTERVAL == 0 {
            self.state.purge_due = true;
        }

        let kind = self.incremental_action;
        let plan = self.plan().await?;

        if self.state.purge_due {
            self.purge_registry(&plan).await?;
            self.state.purge_due = false;
        }

        let specs = plan
            .into_iter()
            .filter(|spec| takes_part_in(spec, kind))
            .collect();
        let results = self
            .run_actions(kind, specs, ExecutionContext::Sequential)
            .await?;

        // We only look at the results once the whole cycle ran, the first failure wins.
        match results.into_iter().find(PipelineResult::is_failure) {
            Some(PipelineResult::Failure { error, .. }) => Err(error),
            _ => Ok(()),
        }
    }

    async fn purge_registry(&self, plan: &[TableLoadSpec]) -> SyncResult<()> {
        let keep: HashSet<String> = plan
            .iter()
            .map(|spec| spec.table_name.clone())
            .chain(self.extra_tables.iter().cloned())
            .collect();

        let purged = self.registry.purge_except(&keep).await?;
        info!(purged, kept = keep.len(), "purged registry");
        counter!(MIRROR_REGISTRY_PURGED_TOTAL).increment(purged);

        Ok(())
    }

    /// Returns the cached table plan, resolving it on first use.
    async fn plan(&mut self) -> SyncResult<Vec<TableLoadSpec>> {
        if let Some(plan) = &self.state.plan {
            return Ok(plan.clone());
        }

        let plan = resolve_table_plan(&self.plans, &mut self.state.connections).await?;
        self.state.plan = Some(plan.clone());

        Ok(plan)
    }

    async fn selected_specs(
        &mut self,
        selection: &TableSelection,
        kind: LoadActionKind,
    ) -> SyncResult<Vec<TableLoadSpec>> {
        let plan = self.plan().await?;
        let selected = select_tables(&plan, selection)?;

        Ok(selected
            .into_iter()
            .filter(|spec| takes_part_in(spec, kind))
            .collect())
    }

    /// Builds one action of `kind` per spec and runs them under `context`.
    ///
    /// Every action is built before the first one runs, so a construction failure runs
    /// nothing.
    async fn run_actions(
        &mut self,
        kind: LoadActionKind,
        specs: Vec<TableLoadSpec>,
        context: ExecutionContext,
    ) -> SyncResult<Vec<PipelineResult>> {
        if specs.is_empty() {
            debug!(action = %kind, "no tables to run");
            return Ok(Vec::new());
        }

        let target = self.state.connections.target()?;

        let mut actions = Vec::with_capacity(specs.len());
        for spec in specs {
            let source = self.state.connections.source(&spec.source)?;
            let load_context = LoadContext {
                target: target.clone(),
                source,
                spec,
                registry: self.registry.clone(),
                clock: self.clock.clone(),
            };
            actions.push(self.actions.create(kind, load_context)?);
        }

        Ok(Pipeline::new(LOAD_STAGES, context).run(actions).await)
    }

    /// Reports every failed table, then fails once if any table failed.
    fn collect_and_report(&self, results: Vec<PipelineResult>) -> SyncResult<()> {
        let mut failed_tables = Vec::new();
        for result in &results {
            if let PipelineResult::Failure { task, error } = result {
                self.handler.notify_error(task, error);
                failed_tables.push(task.table_name.as_str());
            }
        }

        if !failed_tables.is_empty() {
            bail!(
                ErrorKind::TableLoadsFailed,
                "One or more table loads failed",
                format!(
                    "{} of {} tables failed: {}",
                    failed_tables.len(),
                    results.len(),
                    failed_tables.join(", ")
                )
            );
        }

        Ok(())
    }
}

/// Whether a table runs under actions of `kind`.
fn takes_part_in(spec: &TableLoadSpec, kind: LoadActionKind) -> bool {
    match kind {
        LoadActionKind::Batch => spec.batch_load,
        LoadActionKind::RefreshRecent => spec.refresh_recent.is_enabled(),
        LoadActionKind::Incremental => true,
    }
}
