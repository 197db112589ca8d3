use mirror::actions::{LoadActionKind, Stage};
use mirror::config::{RefreshRecent, TableConfig};
use mirror::error::ErrorKind;
use mirror::handler::ErrorHandler;
use mirror::manager::SyncManager;
use mirror::plan::TableSelection;
use mirror::test_utils::action::{Behavior, ScriptedActionFactory};
use mirror::test_utils::config::{plan, sync_config};
use mirror::test_utils::connection::TestConnectionFactory;
use mirror::test_utils::handler::{HandlerEvent, RecordingErrorHandler};
use mirror::test_utils::registry::RecordingRegistry;
use mirror_telemetry::tracing::init_test_tracing;

type TestManager = SyncManager<
    TestConnectionFactory,
    RecordingRegistry,
    ScriptedActionFactory,
    RecordingErrorHandler,
>;

fn manager(
    config: mirror::config::SyncConfig,
    actions: &ScriptedActionFactory,
    registry: &RecordingRegistry,
    handler: &RecordingErrorHandler,
) -> TestManager {
    SyncManager::new(
        config,
        TestConnectionFactory::new(),
        registry.clone(),
        actions.clone(),
        handler.clone(),
    )
}

fn only(names: &[&str]) -> TableSelection {
    TableSelection::Only(names.iter().map(|name| name.to_string()).collect())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_reports_every_failed_table_then_fails_once() {
    init_test_tracing();

    let actions = ScriptedActionFactory::new()
        .always(
            "accounts",
            Behavior::fail_at(Stage::Extract, ErrorKind::QueryFailed),
        )
        .always(
            "invoices",
            Behavior::fail_at(Stage::Load, ErrorKind::InvalidData),
        );
    let registry = RecordingRegistry::new();
    let handler = RecordingErrorHandler::default();
    let config = sync_config(vec![
        plan("crm", &["accounts", "contacts"]),
        plan("billing", &["invoices"]),
    ]);
    let mut manager = manager(config, &actions, &registry, &handler);

    let err = manager.batch(&TableSelection::All).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TableLoadsFailed);
    assert!(err.detail().unwrap().contains("accounts"));
    assert!(err.detail().unwrap().contains("invoices"));

    // Two table notifications, then the aggregate error reported exactly once.
    let events = handler.events();
    assert_eq!(events.len(), 3);
    let mut notified: Vec<_> = handler
        .notified_tasks()
        .into_iter()
        .map(|task| task.table_name)
        .collect();
    notified.sort();
    assert_eq!(notified, vec!["accounts", "invoices"]);
    assert!(matches!(
        &events[2],
        HandlerEvent::Reported { error } if error.kind() == ErrorKind::TableLoadsFailed
    ));

    // Every table was attempted and the refresh pass was skipped.
    assert_eq!(actions.created().len(), 3);
    assert!(actions.specs_of(LoadActionKind::RefreshRecent).is_empty());
    assert_eq!(
        actions.log().stages_of("contacts"),
        vec![Stage::Extract, Stage::Transform, Stage::Load]
    );
    assert_eq!(registry.ensure_storage_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn successful_batch_refreshes_recent_rows() {
    init_test_tracing();

    let actions = ScriptedActionFactory::new();
    let registry = RecordingRegistry::new();
    let handler = RecordingErrorHandler::default();
    let mut crm = plan("crm", &["accounts"]);
    crm.tables.push(TableConfig {
        batch_load: Some(false),
        refresh_recent: Some(RefreshRecent::OnWithColumn("created_at".to_string())),
        ..TableConfig::named("events")
    });
    let mut manager = manager(sync_config(vec![crm]), &actions, &registry, &handler);

    manager.batch(&TableSelection::All).await.unwrap();

    let batch: Vec<_> = actions
        .specs_of(LoadActionKind::Batch)
        .into_iter()
        .map(|spec| spec.table_name)
        .collect();
    let refreshed = actions.specs_of(LoadActionKind::RefreshRecent);
    assert_eq!(batch, vec!["accounts"]);
    assert_eq!(refreshed.len(), 1);
    assert_eq!(refreshed[0].aux_timestamp_column(), Some("created_at"));
    assert!(handler.events().is_empty());
    assert_eq!(registry.ensure_storage_calls(), 2);
}

#[tokio::test]
async fn unknown_tables_fail_before_any_action_runs() {
    init_test_tracing();

    let actions = ScriptedActionFactory::new();
    let registry = RecordingRegistry::new();
    let handler = RecordingErrorHandler::default();
    let config = sync_config(vec![plan("crm", &["accounts", "contacts"])]);
    let mut manager = manager(config, &actions, &registry, &handler);

    let err = manager
        .batch(&only(&["accounts", "orders", "refunds"]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnknownTable);
    assert_eq!(err.detail(), Some("orders, refunds"));
    assert!(actions.created().is_empty());
    assert_eq!(handler.reported_errors().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn selected_tables_are_forced_into_both_passes() {
    init_test_tracing();

    let actions = ScriptedActionFactory::new();
    let registry = RecordingRegistry::new();
    let handler = RecordingErrorHandler::default();
    let mut crm = plan("crm", &[]);
    crm.tables = vec![
        TableConfig {
            batch_load: Some(false),
            refresh_recent: Some(RefreshRecent::Off),
            ..TableConfig::named("accounts")
        },
        TableConfig::named("contacts"),
    ];
    let mut manager = manager(sync_config(vec![crm]), &actions, &registry, &handler);

    manager.batch(&only(&["accounts"])).await.unwrap();

    let batch = actions.specs_of(LoadActionKind::Batch);
    let refreshed = actions.specs_of(LoadActionKind::RefreshRecent);
    assert_eq!(batch.len(), 1);
    assert_eq!(refreshed.len(), 1);
    for spec in batch.iter().chain(refreshed.iter()) {
        assert_eq!(spec.table_name, "accounts");
        assert!(spec.batch_load);
        assert_eq!(spec.refresh_recent, RefreshRecent::On);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refresh_recent_only_runs_enabled_tables() {
    init_test_tracing();

    let actions = ScriptedActionFactory::new().always(
        "events",
        Behavior::fail_at(Stage::Extract, ErrorKind::ExtractionFailed),
    );
    let registry = RecordingRegistry::new();
    let handler = RecordingErrorHandler::default();
    let mut crm = plan("crm", &["accounts"]);
    crm.tables.push(TableConfig {
        refresh_recent: Some(RefreshRecent::On),
        ..TableConfig::named("events")
    });
    let mut manager = manager(sync_config(vec![crm]), &actions, &registry, &handler);

    let err = manager
        .refresh_recent(&TableSelection::All)
        .await
        .unwrap_err();

    // Transient kinds are not retried outside of the incremental loop.
    assert_eq!(err.kind(), ErrorKind::TableLoadsFailed);
    assert!(!handler.is_transient(&err));
    assert_eq!(actions.created().len(), 1);
    assert_eq!(handler.notified_tasks()[0].table_name, "events");
    assert_eq!(handler.notified_tasks()[0].kind, LoadActionKind::RefreshRecent);
}
