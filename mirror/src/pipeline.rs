//! Drives load actions through their stages.
//!
//! A [`Pipeline`] runs every submitted item through the same ordered stages and returns one
//! [`PipelineResult`] per item. Failures, panics included, are captured at the item boundary
//! and never escape [`Pipeline::run`]. The [`ExecutionContext`] only decides how items run
//! relative to each other; the stages of one item always run one after the other.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::join_all;
use metrics::counter;
use tracing::{debug, error};

use crate::actions::{LoadAction, LoadTask, Stage};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::metrics::{
    ACTION_LABEL, ERROR_KIND_LABEL, MIRROR_TABLE_LOAD_FAILURES_TOTAL, MIRROR_TABLE_LOADS_TOTAL,
    TABLE_NAME_LABEL,
};
use crate::sync_error;

/// How the items of a pipeline run relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// One item at a time, in submission order, on the calling task.
    Sequential,
    /// One tokio task per item, all running concurrently. The run waits for every task.
    ///
    /// Only meant for bounded item sets, a task is spawned for every item.
    Threaded,
}

/// Outcome of one pipeline item.
#[derive(Debug, Clone)]
pub enum PipelineResult {
    Success { task: LoadTask },
    Failure { task: LoadTask, error: SyncError },
}

impl PipelineResult {
    pub fn task(&self) -> &LoadTask {
        match self {
            PipelineResult::Success { task } => task,
            PipelineResult::Failure { task, .. } => task,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PipelineResult::Failure { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Pipeline {
    stages: &'static [Stage],
    context: ExecutionContext,
}

impl Pipeline {
    pub fn new(stages: &'static [Stage], context: ExecutionContext) -> Self {
        Self { stages, context }
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    /// Runs every item through the stages and returns exactly one result per item.
    ///
    /// Results of a sequential run are in submission order. Results of a threaded run are too,
    /// but callers should correlate them through [`PipelineResult::task`].
    pub async fn run<A>(&self, items: Vec<A>) -> Vec<PipelineResult>
    where
        A: LoadAction,
    {
        if items.is_empty() {
            return Vec::new();
        }

        match self.context {
            ExecutionContext::Sequential => {
                let mut results = Vec::with_capacity(items.len());
                for item in items {
                    results.push(run_item(item, self.stages).await);
                }

                results
            }
            ExecutionContext::Threaded => {
                let stages = self.stages;
                let handles: Vec<_> = items
                    .into_iter()
                    .map(|item| {
                        let task = item.task().clone();
                        let handle = tokio::spawn(run_item(item, stages));
                        (task, handle)
                    })
                    .collect();

                let (tasks, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
                let outcomes = join_all(handles).await;

                tasks
                    .into_iter()
                    .zip(outcomes)
                    .map(|(task, outcome)| match outcome {
                        Ok(result) => result,
                        // The item itself catches panics, a join error means the task was
                        // cancelled, e.g. because the runtime is shutting down.
                        Err(err) => {
                            let error = sync_error!(
                                ErrorKind::LoadActionPanic,
                                "Load action task did not complete",
                                format!("{task}: {err}")
                            );
                            record_failure(&task, &error);
                            PipelineResult::Failure { task, error }
                        }
                    })
                    .collect()
            }
        }
    }
}

async fn run_item<A>(mut item: A, stages: &'static [Stage]) -> PipelineResult
where
    A: LoadAction,
{
    let task = item.task().clone();

    let outcome = AssertUnwindSafe(run_stages(&mut item, stages))
        .catch_unwind()
        .await;

    let error = match outcome {
        Ok(Ok(())) => {
            debug!(table = %task.table_name, action = %task.kind, "table load completed");
            counter!(
                MIRROR_TABLE_LOADS_TOTAL,
                TABLE_NAME_LABEL => task.table_name.clone(),
                ACTION_LABEL => task.kind.as_static_str(),
            )
            .increment(1);

            return PipelineResult::Success { task };
        }
        Ok(Err(error)) => error,
        Err(panic) => sync_error!(
            ErrorKind::LoadActionPanic,
            "Load action panicked",
            format!("{task}: {}", panic_message(panic.as_ref()))
        ),
    };

    record_failure(&task, &error);

    PipelineResult::Failure { task, error }
}

async fn run_stages<A>(item: &mut A, stages: &[Stage]) -> SyncResult<()>
where
    A: LoadAction,
{
    for stage in stages {
        debug!(table = %item.task().table_name, %stage, "running stage");
        match stage {
            Stage::Extract => item.extract().await?,
            Stage::Transform => item.transform().await?,
            Stage::Load => item.load().await?,
        }
    }

    Ok(())
}

fn record_failure(task: &LoadTask, error: &SyncError) {
    error!(
        table = %task.table_name,
        source = %task.source,
        action = %task.kind,
        error = %error,
        "table load failed"
    );
    counter!(
        MIRROR_TABLE_LOAD_FAILURES_TOTAL,
        TABLE_NAME_LABEL => task.table_name.clone(),
        ACTION_LABEL => task.kind.as_static_str(),
        ERROR_KIND_LABEL => format!("{:?}", error.kind()),
    )
    .increment(1);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::LOAD_STAGES;
    use crate::test_utils::action::{Behavior, ScriptedAction, StageLog};

    fn items(log: &StageLog, failing: usize, behavior: Behavior) -> Vec<ScriptedAction> {
        (0..5)
            .map(|index| {
                let table = format!("table_{index}");
                if index == failing {
                    ScriptedAction::new(&table, behavior.clone(), log.clone())
                } else {
                    ScriptedAction::new(&table, Behavior::Succeed, log.clone())
                }
            })
            .collect()
    }

    fn assert_single_failure(results: &[PipelineResult], table: &str) {
        assert_eq!(results.len(), 5);

        let failures: Vec<_> = results.iter().filter(|result| result.is_failure()).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].task().table_name, table);
    }

    #[tokio::test]
    async fn empty_input_yields_no_results() {
        let pipeline = Pipeline::new(LOAD_STAGES, ExecutionContext::Threaded);

        let results = pipeline.run(Vec::<ScriptedAction>::new()).await;

        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn sequential_failure_does_not_stop_later_items() {
        let log = StageLog::default();
        let pipeline = Pipeline::new(LOAD_STAGES, ExecutionContext::Sequential);

        let results = pipeline
            .run(items(&log, 2, Behavior::fail_at(Stage::Extract, ErrorKind::QueryFailed)))
            .await;

        assert_single_failure(&results, "table_2");
        let order: Vec<_> = results.iter().map(|r| r.task().table_name.clone()).collect();
        assert_eq!(
            order,
            vec!["table_0", "table_1", "table_2", "table_3", "table_4"]
        );
        assert_eq!(log.stages_of("table_2"), vec![Stage::Extract]);
        assert_eq!(log.stages_of("table_4"), LOAD_STAGES.to_vec());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn threaded_failure_does_not_affect_other_items() {
        let log = StageLog::default();
        let pipeline = Pipeline::new(LOAD_STAGES, ExecutionContext::Threaded);

        let results = pipeline
            .run(items(&log, 1, Behavior::fail_at(Stage::Extract, ErrorKind::QueryFailed)))
            .await;

        assert_single_failure(&results, "table_1");
        for index in [0, 2, 3, 4] {
            assert_eq!(
                log.stages_of(&format!("table_{index}")),
                LOAD_STAGES.to_vec()
            );
        }
    }

    #[tokio::test]
    async fn failing_stage_aborts_remaining_stages() {
        let log = StageLog::default();
        let pipeline = Pipeline::new(LOAD_STAGES, ExecutionContext::Sequential);

        let results = pipeline
            .run(items(&log, 0, Behavior::fail_at(Stage::Transform, ErrorKind::InvalidData)))
            .await;

        assert_eq!(log.stages_of("table_0"), vec![Stage::Extract, Stage::Transform]);
        match &results[0] {
            PipelineResult::Failure { error, .. } => assert_eq!(error.kind(), ErrorKind::InvalidData),
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panics_become_failures_in_both_contexts() {
        for context in [ExecutionContext::Sequential, ExecutionContext::Threaded] {
            let log = StageLog::default();
            let pipeline = Pipeline::new(LOAD_STAGES, context);

            let results = pipeline
                .run(items(&log, 3, Behavior::PanicAt(Stage::Load)))
                .await;

            assert_single_failure(&results, "table_3");
            let failure = results.iter().find(|result| result.is_failure()).unwrap();
            match failure {
                PipelineResult::Failure { error, .. } => {
                    assert_eq!(error.kind(), ErrorKind::LoadActionPanic);
                    assert!(error.detail().unwrap().contains("scripted panic"));
                }
                PipelineResult::Success { .. } => unreachable!(),
            }
        }
    }
}
