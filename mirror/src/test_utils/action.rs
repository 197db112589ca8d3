use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use mirror_config::shared::LoadActionKind;

use crate::actions::{LoadAction, LoadActionFactory, LoadContext, LoadTask, Stage};
use crate::concurrency::stop::StopHandle;
use crate::error::{ErrorKind, SyncResult};
use crate::plan::TableLoadSpec;
use crate::sync_error;

/// What a [`ScriptedAction`] does when its stages run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail { stage: Stage, kind: ErrorKind },
    PanicAt(Stage),
}

impl Behavior {
    pub fn fail_at(stage: Stage, kind: ErrorKind) -> Self {
        Behavior::Fail { stage, kind }
    }
}

/// Shared record of every stage run, in execution order.
#[derive(Debug, Clone, Default)]
pub struct StageLog {
    entries: Arc<Mutex<Vec<(String, Stage)>>>,
}

impl StageLog {
    fn record(&self, table_name: &str, stage: Stage) {
        self.entries
            .lock()
            .unwrap()
            .push((table_name.to_string(), stage));
    }

    /// Stages run for `table_name`, in order.
    pub fn stages_of(&self, table_name: &str) -> Vec<Stage> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(table, _)| table == table_name)
            .map(|(_, stage)| *stage)
            .collect()
    }
}

/// [`LoadAction`] whose outcome is decided up front.
#[derive(Debug)]
pub struct ScriptedAction {
    task: LoadTask,
    behavior: Behavior,
    log: StageLog,
}

impl ScriptedAction {
    /// A batch action on `table_name` of source `test`.
    pub fn new(table_name: &str, behavior: Behavior, log: StageLog) -> Self {
        let task = LoadTask {
            table_name: table_name.to_string(),
            source: "test".to_string(),
            kind: LoadActionKind::Batch,
        };

        Self {
            task,
            behavior,
            log,
        }
    }

    fn run_stage(&mut self, stage: Stage) -> SyncResult<()> {
        self.log.record(&self.task.table_name, stage);

        match &self.behavior {
            Behavior::Fail {
                stage: failing,
                kind,
            } if *failing == stage => Err(sync_error!(
                *kind,
                "Scripted stage failure",
                format!("{} failed at {stage}", self.task)
            )),
            Behavior::PanicAt(panicking) if *panicking == stage => {
                panic!("scripted panic at {stage}")
            }
            _ => Ok(()),
        }
    }
}

impl LoadAction for ScriptedAction {
    fn task(&self) -> &LoadTask {
        &self.task
    }

    async fn extract(&mut self) -> SyncResult<()> {
        self.run_stage(Stage::Extract)
    }

    async fn transform(&mut self) -> SyncResult<()> {
        self.run_stage(Stage::Transform)
    }

    async fn load(&mut self) -> SyncResult<()> {
        self.run_stage(Stage::Load)
    }
}

#[derive(Debug, Default)]
struct FactoryInner {
    scripts: HashMap<String, VecDeque<Behavior>>,
    fallbacks: HashMap<String, Behavior>,
    created: Vec<(LoadTask, TableLoadSpec)>,
    stop_after: Option<(usize, StopHandle)>,
}

/// [`LoadActionFactory`] handing out [`ScriptedAction`]s.
///
/// Each table first consumes its scripted behaviors, one per created action, then falls back
/// to its fallback behavior, [`Behavior::Succeed`] unless configured otherwise.
#[derive(Debug, Clone, Default)]
pub struct ScriptedActionFactory {
    inner: Arc<Mutex<FactoryInner>>,
    log: StageLog,
}

impl ScriptedActionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `behavior` for every action of `table_name` once its script ran out.
    pub fn always(self, table_name: &str, behavior: Behavior) -> Self {
        self.inner
            .lock()
            .unwrap()
            .fallbacks
            .insert(table_name.to_string(), behavior);

        self
    }

    /// Uses `behaviors`, in order, for the next actions of `table_name`.
    pub fn script(self, table_name: &str, behaviors: Vec<Behavior>) -> Self {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .entry(table_name.to_string())
            .or_default()
            .extend(behaviors);

        self
    }

    /// Requests a stop through `handle` once `creations` actions were created.
    pub fn stop_after(&self, creations: usize, handle: StopHandle) {
        self.inner.lock().unwrap().stop_after = Some((creations, handle));
    }

    /// Tasks of every created action, in creation order.
    pub fn created(&self) -> Vec<LoadTask> {
        self.inner
            .lock()
            .unwrap()
            .created
            .iter()
            .map(|(task, _)| task.clone())
            .collect()
    }

    /// Specs handed to every created action of `kind`, in creation order.
    pub fn specs_of(&self, kind: LoadActionKind) -> Vec<TableLoadSpec> {
        self.inner
            .lock()
            .unwrap()
            .created
            .iter()
            .filter(|(task, _)| task.kind == kind)
            .map(|(_, spec)| spec.clone())
            .collect()
    }

    pub fn log(&self) -> StageLog {
        self.log.clone()
    }
}

impl<C, R> LoadActionFactory<C, R> for ScriptedActionFactory
where
    C: Send,
    R: Send,
{
    type Action = ScriptedAction;

    fn create(
        &self,
        kind: LoadActionKind,
        context: LoadContext<C, R>,
    ) -> SyncResult<ScriptedAction> {
        let mut inner = self.inner.lock().unwrap();

        let task = LoadTask::new(&context.spec, kind);
        inner.created.push((task.clone(), context.spec));

        if let Some((creations, handle)) = &inner.stop_after {
            if inner.created.len() >= *creations {
                handle.stop();
            }
        }

        let scripted = inner
            .scripts
            .get_mut(&task.table_name)
            .and_then(VecDeque::pop_front);
        let behavior = match scripted {
            Some(behavior) => behavior,
            None => inner
                .fallbacks
                .get(&task.table_name)
                .cloned()
                .unwrap_or(Behavior::Succeed),
        };

        Ok(ScriptedAction {
            task,
            behavior,
            log: self.log.clone(),
        })
    }
}
