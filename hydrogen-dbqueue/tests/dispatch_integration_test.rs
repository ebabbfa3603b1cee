//! End-to-end dispatch tests against SQLite.
//!
//! Uses file-backed temp databases because in-memory SQLite creates an
//! isolated database per connection — the Lead and worker queues would not
//! see each other's tables.

use std::time::Duration;

use tempfile::TempDir;

use hydrogen_core::config::DatabaseConfig;
use hydrogen_core::error::DbError;
use hydrogen_core::types::QueryRequest;
use hydrogen_dbqueue::QueueManager;

/// A query that burns a visible amount of time in SQLite.
const HEAVY_QUERY: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 1000000) SELECT COUNT(*) AS n FROM c";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn temp_manager_with(name: &str, tune: impl FnOnce(&mut DatabaseConfig)) -> (TempDir, QueueManager) {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("dispatch.db");
    let manager = QueueManager::new();
    let mut config = DatabaseConfig::new(name, db_path.to_str().unwrap());
    tune(&mut config);
    manager.add_database(config).unwrap();
    (dir, manager)
}

fn temp_manager(name: &str) -> (TempDir, QueueManager) {
    temp_manager_with(name, |_| {})
}

/// Wait for the Lead to connect and its conductor to launch the workers.
fn wait_until_ready(manager: &QueueManager, name: &str) {
    for _ in 0..500 {
        if manager.is_connected(name).unwrap() && manager.worker_queue_count(name).unwrap() >= 4 {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("database {name} never became ready");
}

#[test]
fn executes_queries_end_to_end() {
    let (_dir, manager) = temp_manager("main");
    wait_until_ready(&manager, "main");

    manager
        .execute(
            "main",
            QueryRequest::new("ddl", "CREATE TABLE accounts (id INTEGER PRIMARY KEY, name TEXT)"),
            None,
        )
        .unwrap();

    let insert = QueryRequest::new(
        "ins",
        "INSERT INTO accounts (id, name) VALUES (:id, :name)",
    )
    .with_parameters(r#"{"INTEGER": {"id": 1}, "STRING": {"name": "ada"}}"#);
    let result = manager.execute("main", insert, Some("fast")).unwrap();
    assert!(result.success);
    assert_eq!(result.affected_rows, 1);

    let select = QueryRequest::new("sel", "SELECT name FROM accounts WHERE id = :id")
        .with_parameters(r#"{"INTEGER": {"id": 1}}"#);
    let result = manager.execute("main", select, Some("fast")).unwrap();
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0]["name"], "ada");
}

#[test]
fn routes_to_every_queue_kind() {
    let (_dir, manager) = temp_manager("main");
    wait_until_ready(&manager, "main");

    for hint in [None, Some("slow"), Some("medium"), Some("fast"), Some("cache"), Some("bogus")] {
        let result = manager
            .execute("main", QueryRequest::new("probe", "SELECT 1 AS one"), hint)
            .unwrap();
        assert_eq!(result.rows[0]["one"], 1, "hint {hint:?} failed");
    }

    let stats = manager.stats_json("main").unwrap();
    assert_eq!(stats["total_queries_submitted"], 6);
    assert_eq!(stats["total_queries_completed"], 6);
    assert_eq!(stats["total_queries_failed"], 0);
}

#[test]
fn identical_concurrent_queries_share_one_execution() {
    let (_dir, manager) = temp_manager("main");
    wait_until_ready(&manager, "main");

    // Occupy the medium queue so the duplicate pair stays queued together.
    let blocker = manager
        .submit("main", QueryRequest::new("blocker", HEAVY_QUERY), Some("medium"))
        .unwrap();

    let first = manager
        .submit("main", QueryRequest::new("dup-a", "SELECT 42 AS answer"), Some("medium"))
        .unwrap();
    let second = manager
        .submit("main", QueryRequest::new("dup-b", "SELECT 42 AS answer"), Some("medium"))
        .unwrap();

    let first = first.wait().unwrap();
    let second = second.wait().unwrap();
    blocker.wait().unwrap();

    // The joined submission receives the first submission's result verbatim,
    // including its query id.
    assert_eq!(first.query_id, "dup-a");
    assert_eq!(second.query_id, "dup-a");
    assert_eq!(first.rows, second.rows);

    let stats = manager.stats_json("main").unwrap();
    assert_eq!(stats["total_deduplicated"], 1);
}

#[test]
fn per_query_timeout_fires() {
    let (_dir, manager) = temp_manager("main");
    wait_until_ready(&manager, "main");

    let mut request = QueryRequest::new("slow", HEAVY_QUERY);
    request.timeout_seconds = Some(0);
    let err = manager.execute("main", request, Some("slow")).unwrap_err();
    assert!(matches!(err, DbError::Timeout { .. }));

    let stats = manager.stats_json("main").unwrap();
    assert_eq!(stats["total_timeouts"], 1);
}

#[test]
fn failed_queries_are_reported_not_hung() {
    let (_dir, manager) = temp_manager("main");
    wait_until_ready(&manager, "main");

    let result = manager
        .execute("main", QueryRequest::new("bad", "SELECT * FROM no_such_table"), None)
        .unwrap();
    assert!(!result.success);
    assert!(result.error_message.is_some());

    let stats = manager.stats_json("main").unwrap();
    assert_eq!(stats["total_queries_failed"], 1);
}

#[test]
fn saturated_queue_rejects_instead_of_blocking() {
    let (_dir, manager) = temp_manager_with("main", |config| {
        config.queue_capacity = Some(1);
        // Pin the slow kind to a single queue so load cannot scale away.
        config.queues.slow.start = 1;
        config.queues.slow.min = 1;
        config.queues.slow.max = 1;
    });
    wait_until_ready(&manager, "main");

    let first = manager
        .submit("main", QueryRequest::new("h1", HEAVY_QUERY), Some("slow"))
        .unwrap();
    // Let the worker dequeue the first job so the channel is free again.
    std::thread::sleep(Duration::from_millis(50));
    let second = manager
        .submit(
            "main",
            QueryRequest::new("h2", format!("{HEAVY_QUERY} WHERE 1 = 1")),
            Some("slow"),
        )
        .unwrap();

    let mut saturated = false;
    for i in 0..32 {
        let request = QueryRequest::new("flood", format!("SELECT {i} AS n"));
        match manager.submit("main", request, Some("slow")) {
            Ok(_) => {}
            Err(DbError::QueueSaturated { .. }) => {
                saturated = true;
                break;
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert!(saturated, "a capacity-1 queue under load must saturate");

    // The accepted work still completes.
    first.wait().unwrap();
    second.wait().unwrap();
}

#[test]
fn worker_queues_scale_with_load_and_back_down() {
    let (_dir, manager) = temp_manager_with("main", |config| {
        config.heartbeat_interval_seconds = Some(1);
        config.queues.medium.max = 2;
    });
    wait_until_ready(&manager, "main");

    // Keep the medium queue visibly non-empty across a heartbeat.
    let load_query = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 3000000) SELECT COUNT(*) AS n FROM c";
    let tickets: Vec<_> = (0..8)
        .map(|i| {
            let mut request = QueryRequest::new(
                format!("load-{i}"),
                format!("{load_query} WHERE {i} = {i}"),
            );
            request.timeout_seconds = Some(120);
            manager.submit("main", request, Some("medium")).unwrap()
        })
        .collect();

    let mut scaled_up = false;
    for _ in 0..200 {
        if manager.worker_queue_count("main").unwrap() >= 5 {
            scaled_up = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(scaled_up, "busy medium queue never scaled up");

    for ticket in tickets {
        ticket.wait().unwrap();
    }

    // Idle queues shrink back to the per-kind floor.
    let mut scaled_down = false;
    for _ in 0..200 {
        if manager.worker_queue_count("main").unwrap() == 4 {
            scaled_down = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(scaled_down, "idle worker queues never scaled back down");
}

#[test]
fn unknown_database_is_an_error() {
    let manager = QueueManager::new();
    let err = manager
        .execute("missing", QueryRequest::new("q", "SELECT 1"), None)
        .unwrap_err();
    assert!(matches!(err, DbError::UnknownDatabase { name } if name == "missing"));
}

#[test]
fn duplicate_registration_is_rejected() {
    let (_dir, manager) = temp_manager("main");
    let err = manager
        .add_database(DatabaseConfig::new("main", ":memory:"))
        .unwrap_err();
    assert!(matches!(err, DbError::Param { .. }));
}

#[test]
fn engine_mismatch_is_rejected() {
    let manager = QueueManager::new();
    let mut config = DatabaseConfig::new("main", "postgresql://u:p@h/db");
    config.engine = Some("sqlite".to_string());
    let err = manager.add_database(config).unwrap_err();
    assert!(matches!(err, DbError::Param { .. }));
}

#[test]
fn remove_database_stops_accepting_queries() {
    let (_dir, manager) = temp_manager("main");
    wait_until_ready(&manager, "main");

    manager.remove_database("main").unwrap();
    assert!(manager.database_names().is_empty());
    let err = manager
        .execute("main", QueryRequest::new("q", "SELECT 1"), None)
        .unwrap_err();
    assert!(matches!(err, DbError::UnknownDatabase { .. }));
}

#[test]
fn shutdown_is_idempotent() {
    let (_dir, manager) = temp_manager("main");
    wait_until_ready(&manager, "main");
    manager.shutdown();
    manager.shutdown();
}
