use mirror::actions::{LoadActionKind, Stage};
use mirror::config::SyncConfig;
use mirror::connection::ConnectionRole;
use mirror::error::ErrorKind;
use mirror::manager::{MAX_CONSECUTIVE_TRANSIENT_FAILURES, SyncManager};
use mirror::test_utils::action::{Behavior, ScriptedActionFactory};
use mirror::test_utils::config::{plan, sync_config};
use mirror::test_utils::connection::TestConnectionFactory;
use mirror::test_utils::handler::RecordingErrorHandler;
use mirror::test_utils::registry::RecordingRegistry;
use mirror_telemetry::tracing::init_test_tracing;

struct Harness {
    manager: SyncManager<
        TestConnectionFactory,
        RecordingRegistry,
        ScriptedActionFactory,
        RecordingErrorHandler,
    >,
    connections: TestConnectionFactory,
    actions: ScriptedActionFactory,
    registry: RecordingRegistry,
    handler: RecordingErrorHandler,
}

impl Harness {
    fn new(config: SyncConfig, actions: ScriptedActionFactory) -> Self {
        Self::with_registry(config, actions, RecordingRegistry::new())
    }

    fn with_registry(
        config: SyncConfig,
        actions: ScriptedActionFactory,
        registry: RecordingRegistry,
    ) -> Self {
        let connections = TestConnectionFactory::new();
        let handler = RecordingErrorHandler::default();
        let manager = SyncManager::new(
            config,
            connections.clone(),
            registry.clone(),
            actions.clone(),
            handler.clone(),
        );

        Self {
            manager,
            connections,
            actions,
            registry,
            handler,
        }
    }

    /// Stops the loop once `creations` actions were created.
    fn stop_after(self, creations: usize) -> Self {
        self.actions
            .stop_after(creations, self.manager.stop_handle());
        self
    }
}

fn extraction_failure() -> Behavior {
    Behavior::fail_at(Stage::Extract, ErrorKind::ExtractionFailed)
}

#[tokio::test]
async fn gives_up_after_ten_transient_failures_in_a_row() {
    init_test_tracing();

    let actions = ScriptedActionFactory::new().always("accounts", extraction_failure());
    let mut harness = Harness::new(sync_config(vec![plan("crm", &["accounts"])]), actions);

    let err = harness.manager.increment().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
    assert_eq!(
        harness.actions.created().len(),
        MAX_CONSECUTIVE_TRANSIENT_FAILURES as usize
    );
    assert_eq!(harness.manager.cycle(), 10);
    assert_eq!(harness.handler.reported_errors().len(), 1);
    // Failures inside a cycle are not reported per table.
    assert!(harness.handler.notified_tasks().is_empty());
}

#[tokio::test]
async fn a_successful_cycle_resets_the_failure_count() {
    init_test_tracing();

    let mut script = vec![extraction_failure(); 9];
    script.push(Behavior::Succeed);
    let actions = ScriptedActionFactory::new()
        .script("accounts", script)
        .always("accounts", extraction_failure());
    let mut harness = Harness::new(sync_config(vec![plan("crm", &["accounts"])]), actions);

    let err = harness.manager.increment().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
    assert_eq!(harness.actions.created().len(), 20);
}

#[tokio::test]
async fn non_transient_failures_end_the_loop_at_once() {
    init_test_tracing();

    let actions = ScriptedActionFactory::new().always(
        "contacts",
        Behavior::fail_at(Stage::Load, ErrorKind::MissingPrimaryKey),
    );
    let mut harness = Harness::new(
        sync_config(vec![plan("crm", &["accounts", "contacts", "deals"])]),
        actions,
    );

    let err = harness.manager.increment().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MissingPrimaryKey);
    assert_eq!(harness.manager.cycle(), 1);
    // Sequential cycles keep going after a failure, the first one is raised afterwards.
    assert_eq!(harness.actions.created().len(), 3);
    assert_eq!(
        harness.actions.log().stages_of("deals"),
        vec![Stage::Extract, Stage::Transform, Stage::Load]
    );
}

#[tokio::test]
async fn stop_before_the_loop_runs_no_cycle() {
    init_test_tracing();

    let mut harness = Harness::new(
        sync_config(vec![plan("crm", &["accounts"])]),
        ScriptedActionFactory::new(),
    );

    harness.manager.stop();
    harness.manager.increment().await.unwrap();

    assert_eq!(harness.manager.cycle(), 0);
    assert!(harness.actions.created().is_empty());
    assert!(harness.registry.purges().is_empty());
}

#[tokio::test]
async fn stop_is_observed_between_cycles() {
    init_test_tracing();

    let mut harness = Harness::new(
        sync_config(vec![plan("crm", &["accounts", "contacts"])]),
        ScriptedActionFactory::new(),
    )
    .stop_after(5);

    harness.manager.increment().await.unwrap();

    // The stop is requested mid cycle, the cycle still runs to its end.
    assert_eq!(harness.manager.cycle(), 3);
    assert_eq!(harness.actions.created().len(), 6);
    assert!(
        harness
            .actions
            .created()
            .iter()
            .all(|task| task.kind == LoadActionKind::Incremental)
    );
}

#[tokio::test]
async fn registry_is_purged_on_the_first_cycle_of_every_interval() {
    init_test_tracing();

    for (cycles, purges) in [(1, 1), (100, 1), (101, 2)] {
        let mut config = sync_config(vec![plan("crm", &["accounts"])]);
        config.extra_tables = vec!["audit_log".to_string()];
        let mut harness = Harness::new(config, ScriptedActionFactory::new()).stop_after(cycles);

        harness.manager.increment().await.unwrap();

        assert_eq!(harness.manager.cycle(), cycles as u64);
        let recorded = harness.registry.purges();
        assert_eq!(recorded.len(), purges, "after {cycles} cycles");
        for keep in recorded {
            assert!(keep.contains("accounts"));
            assert!(keep.contains("audit_log"));
            assert_eq!(keep.len(), 2);
        }
    }
}

#[tokio::test]
async fn refresh_recent_cycles_only_run_enabled_tables() {
    init_test_tracing();

    let mut crm = plan("crm", &["accounts", "events"]);
    crm.tables[1].refresh_recent = Some(mirror::config::RefreshRecent::On);
    let mut config = sync_config(vec![crm]);
    config.incremental_action = LoadActionKind::RefreshRecent;
    let mut harness = Harness::new(config, ScriptedActionFactory::new()).stop_after(2);

    harness.manager.increment().await.unwrap();

    let tables: Vec<_> = harness
        .actions
        .created()
        .into_iter()
        .map(|task| task.table_name)
        .collect();
    assert_eq!(tables, vec!["events", "events"]);
}

#[tokio::test]
async fn source_connections_are_renewed_every_cycle() {
    init_test_tracing();

    let mut harness = Harness::new(
        sync_config(vec![plan("crm", &["accounts"])]),
        ScriptedActionFactory::new(),
    )
    .stop_after(3);

    harness.manager.increment().await.unwrap();

    assert_eq!(harness.connections.created_count(ConnectionRole::Source), 3);
    assert_eq!(harness.connections.created_count(ConnectionRole::Target), 1);

    let created = harness.connections.created();
    let disconnected = created
        .iter()
        .filter(|connection| connection.is_disconnected())
        .count();
    assert_eq!(disconnected, 2);

    harness.manager.shutdown().await;

    assert!(
        harness
            .connections
            .created()
            .iter()
            .all(|connection| connection.is_disconnected())
    );
}

#[tokio::test]
async fn unavailable_registry_storage_is_retried_by_the_loop() {
    init_test_tracing();

    let registry = RecordingRegistry::new().fail_ensure_storage(1);
    let mut harness = Harness::with_registry(
        sync_config(vec![plan("crm", &["accounts"])]),
        ScriptedActionFactory::new(),
        registry,
    )
    .stop_after(3);

    harness.manager.increment().await.unwrap();

    // The first cycle fails before any action is created.
    assert_eq!(harness.manager.cycle(), 4);
    assert_eq!(harness.actions.created().len(), 3);
    assert_eq!(harness.registry.ensure_storage_calls(), 2);
    assert_eq!(harness.registry.purges().len(), 1);
    assert!(harness.handler.reported_errors().is_empty());
}

#[tokio::test]
async fn storage_failures_count_towards_the_ceiling() {
    init_test_tracing();

    let registry = RecordingRegistry::new().fail_ensure_storage(usize::MAX);
    let mut harness = Harness::with_registry(
        sync_config(vec![plan("crm", &["accounts"])]),
        ScriptedActionFactory::new(),
        registry,
    );

    let err = harness.manager.increment().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InfrastructureUnavailable);
    assert_eq!(harness.manager.cycle(), 10);
    assert_eq!(harness.registry.ensure_storage_calls(), 10);
    assert!(harness.actions.created().is_empty());
}

#[tokio::test]
async fn failed_purge_is_attempted_again_on_the_next_cycle() {
    init_test_tracing();

    let mut config = sync_config(vec![plan("crm", &["accounts"])]);
    config.extra_tables = vec!["audit_log".to_string()];
    let registry = RecordingRegistry::new().fail_purges(1);
    let mut harness = Harness::with_registry(config, ScriptedActionFactory::new(), registry)
        .stop_after(100);

    harness.manager.increment().await.unwrap();

    // Cycle 1 fails on the purge, cycle 2 purges, the next purge is due on cycle 101.
    assert_eq!(harness.manager.cycle(), 101);
    let purges = harness.registry.purges();
    assert_eq!(purges.len(), 3);
    assert_eq!(purges[0], purges[1]);
    assert!(purges[1].contains("accounts"));
    assert!(purges[1].contains("audit_log"));
    assert_eq!(harness.registry.ensure_storage_calls(), 1);
    assert!(harness.handler.reported_errors().is_empty());
}
