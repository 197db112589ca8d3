use std::fmt;
use std::future::Future;
use std::sync::Arc;

use mirror_config::shared::LoadActionKind;

use crate::clock::Clock;
use crate::error::SyncResult;
use crate::plan::TableLoadSpec;

/// A step of a load action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Read the rows to synchronize from the source.
    Extract,
    /// Shape the extracted rows for the target.
    Transform,
    /// Write the rows into the target and record the table state.
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extract => f.write_str("extract"),
            Stage::Transform => f.write_str("transform"),
            Stage::Load => f.write_str("load"),
        }
    }
}

/// Stages every load action runs, in order.
pub const LOAD_STAGES: &[Stage] = &[Stage::Extract, Stage::Transform, Stage::Load];

/// Identity of a load action, attached to every pipeline result and error report.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadTask {
    pub table_name: String,
    pub source: String,
    pub kind: LoadActionKind,
}

impl LoadTask {
    pub fn new(spec: &TableLoadSpec, kind: LoadActionKind) -> Self {
        Self {
            table_name: spec.table_name.clone(),
            source: spec.source.clone(),
            kind,
        }
    }
}

impl fmt::Display for LoadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} from {}", self.kind, self.table_name, self.source)
    }
}

/// Everything a load action works with.
#[derive(Clone)]
pub struct LoadContext<C, R> {
    /// Connection to the target database, shared by every action of a run.
    pub target: C,
    /// Connection to the source of the table, shared by the tables of that source.
    pub source: C,
    pub spec: TableLoadSpec,
    pub registry: R,
    pub clock: Arc<dyn Clock>,
}

impl<C, R> fmt::Debug for LoadContext<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// A unit of work synchronizing one table.
///
/// Stages are called in [`LOAD_STAGES`] order, each at most once, and no stage runs after one
/// failed. Actions own the data passed between their stages.
pub trait LoadAction: Send + 'static {
    fn task(&self) -> &LoadTask;

    fn extract(&mut self) -> impl Future<Output = SyncResult<()>> + Send;

    fn transform(&mut self) -> impl Future<Output = SyncResult<()>> + Send;

    fn load(&mut self) -> impl Future<Output = SyncResult<()>> + Send;
}

/// Builds the load actions of a run.
pub trait LoadActionFactory<C, R>: Send + Sync {
    type Action: LoadAction;

    fn create(&self, kind: LoadActionKind, context: LoadContext<C, R>)
    -> SyncResult<Self::Action>;
}
