//! Tests for the migration runner.
//!
//! These use `MemoryStore` so no real Postgres connection is required.
//! The live database test is in `crates/db/tests/`, gated on
//! `MIGRATE_TEST_DATABASE_URL`.

use std::time::Duration;

use chrono::Utc;
use store::mock::MemoryStore;
use store::{MigrationRecord, MigrationStore};

use crate::{Migration, MigrationError, MigrationRunner, MigrationSet, MigrationState, RunnerConfig};

/// v1 creates `widgets`, v2 adds `widgets.price` and indexes it.
fn widgets_set() -> MigrationSet {
    MigrationSet::new(vec![
        Migration::new(1, "create_widgets", "CREATE TABLE widgets (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL);"),
        Migration::new(
            2,
            "add_widget_price",
            "ALTER TABLE widgets ADD COLUMN price NUMERIC(10, 2);\n\
             CREATE INDEX widgets_price_idx ON widgets (price);",
        ),
    ])
    .expect("valid set")
}

/// `n` migrations, each creating a table named after its version.
fn numbered_set(n: i64) -> MigrationSet {
    MigrationSet::new(
        (1..=n)
            .map(|v| Migration::new(v, format!("table_{v}"), format!("CREATE TABLE t{v} (id INT);")))
            .collect(),
    )
    .expect("valid set")
}

fn fast_runner() -> MigrationRunner {
    MigrationRunner::new(RunnerConfig {
        lock_timeout: Duration::from_secs(5),
        lock_retry_base_delay: Duration::from_millis(1),
        lock_retry_max_delay: Duration::from_millis(20),
        ..RunnerConfig::default()
    })
}

fn record(version: i64) -> MigrationRecord {
    MigrationRecord { version, name: format!("m{version}"), applied_at: Utc::now() }
}

// ============================================================
// Happy path and idempotence
// ============================================================

#[tokio::test]
async fn empty_store_gets_every_migration_then_nothing() {
    let mut store = MemoryStore::new();
    let set = widgets_set();
    let runner = fast_runner();

    let applied = runner.apply_pending(&mut store, &set).await.expect("first run");
    assert_eq!(applied, 2);
    assert!(store.has_statement("CREATE TABLE widgets"));
    assert!(store.has_statement("ADD COLUMN price"));
    assert_eq!(store.applied_versions(), vec![1, 2]);

    let applied = runner.apply_pending(&mut store, &set).await.expect("second run");
    assert_eq!(applied, 0);
    assert_eq!(store.applied_versions(), vec![1, 2]);
    // Nothing was executed twice.
    assert_eq!(store.statements().len(), 3);
}

#[tokio::test]
async fn empty_set_bootstraps_record_table_only() {
    let mut store = MemoryStore::new();
    let set = MigrationSet::new(vec![]).unwrap();

    let applied = fast_runner().apply_pending(&mut store, &set).await.expect("run");
    assert_eq!(applied, 0);
    assert!(store.record_table_exists());
    assert!(store.statements().is_empty());
}

#[tokio::test]
async fn new_migrations_are_applied_on_top_of_history() {
    let mut store = MemoryStore::new();
    let runner = fast_runner();

    runner.apply_pending(&mut store, &numbered_set(2)).await.expect("first build");
    let applied = runner.apply_pending(&mut store, &numbered_set(4)).await.expect("second build");

    assert_eq!(applied, 2);
    assert_eq!(store.applied_versions(), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn lock_is_released_after_success() {
    let mut store = MemoryStore::new();
    fast_runner().apply_pending(&mut store, &widgets_set()).await.expect("run");

    assert_eq!(store.lock_holder(), None);
    assert_eq!(store.lock_acquisitions(), 1);
}

// ============================================================
// Failure atomicity
// ============================================================

#[tokio::test]
async fn failure_mid_body_rolls_back_that_migration_only() {
    let mut store = MemoryStore::new().failing_on("CREATE INDEX widgets_price_idx");
    let set = widgets_set();

    let err = fast_runner()
        .apply_pending(&mut store, &set)
        .await
        .expect_err("v2 should fail");

    assert!(matches!(
        &err,
        MigrationError::Statement { version: 2, name, .. } if name == "add_widget_price"
    ));
    // v1 stays applied; the first statement of v2 ran but was rolled back.
    assert_eq!(store.applied_versions(), vec![1]);
    assert!(store.has_statement("CREATE TABLE widgets"));
    assert!(!store.has_statement("price"));
    assert!(!store.in_boundary());
    assert_eq!(store.lock_holder(), None);
}

#[tokio::test]
async fn rerun_after_fix_applies_the_failed_migration() {
    let mut store = MemoryStore::new().failing_on("ADD COLUMN price");
    let set = widgets_set();
    let runner = fast_runner();

    assert!(runner.apply_pending(&mut store, &set).await.is_err());

    store.clear_failure();
    let applied = runner.apply_pending(&mut store, &set).await.expect("fixed run");
    assert_eq!(applied, 1);
    assert_eq!(store.applied_versions(), vec![1, 2]);
}

#[tokio::test]
async fn applied_versions_are_always_a_prefix() {
    let set = numbered_set(5);

    for failing in 1..=5 {
        let mut store = MemoryStore::new().failing_on(format!("CREATE TABLE t{failing} "));

        let err = fast_runner().apply_pending(&mut store, &set).await.expect_err("should fail");
        assert!(matches!(err, MigrationError::Statement { version, .. } if version == failing));

        let expected: Vec<i64> = (1..failing).collect();
        assert_eq!(store.applied_versions(), expected, "failing at v{failing}");
        assert_eq!(store.statements().len(), expected.len());
    }
}

#[tokio::test]
async fn unreachable_store_is_a_connectivity_error() {
    let mut store = MemoryStore::disconnected();

    let err = fast_runner()
        .apply_pending(&mut store, &widgets_set())
        .await
        .expect_err("store is down");

    assert!(matches!(err, MigrationError::Connectivity { version: 0, .. }));
}

#[tokio::test]
async fn connection_lost_mid_migration_names_that_migration() {
    let mut store = MemoryStore::new().disconnecting_on("ADD COLUMN price");

    let err = fast_runner()
        .apply_pending(&mut store, &widgets_set())
        .await
        .expect_err("connection drops during v2");

    assert!(matches!(
        &err,
        MigrationError::Connectivity { version: 2, name, .. } if name == "add_widget_price"
    ));
    let message = err.to_string();
    assert!(message.contains("migration 2, add_widget_price"), "{message}");
    assert_eq!(store.applied_versions(), vec![1]);
    assert!(!store.in_boundary());
}

#[tokio::test]
async fn failed_record_insert_rolls_back_and_halts() {
    let mut store = MemoryStore::new().failing_insert_on(2);

    let err = fast_runner()
        .apply_pending(&mut store, &numbered_set(3))
        .await
        .expect_err("v2 record insert fails");

    assert!(matches!(
        &err,
        MigrationError::Statement { version: 2, name, .. } if name == "table_2"
    ));
    // v2's body ran inside the boundary but was discarded; v3 never started.
    assert_eq!(store.applied_versions(), vec![1]);
    assert_eq!(store.statements(), vec!["CREATE TABLE t1 (id INT)".to_string()]);
    assert!(!store.in_boundary());
    assert_eq!(store.lock_holder(), None);
}

#[tokio::test]
async fn failed_commit_rolls_back_and_halts() {
    let mut store = MemoryStore::new().failing_commit_on(2);

    let err = fast_runner()
        .apply_pending(&mut store, &numbered_set(3))
        .await
        .expect_err("v2 commit fails");

    assert!(matches!(err, MigrationError::Statement { version: 2, .. }));
    assert_eq!(store.applied_versions(), vec![1]);
    assert!(!store.has_statement("t2"));
    assert!(!store.has_statement("t3"));
    assert!(!store.in_boundary());
    assert_eq!(store.lock_holder(), None);
}

// ============================================================
// History consistency
// ============================================================

#[tokio::test]
async fn gap_in_history_is_rejected_before_anything_runs() {
    let mut store = MemoryStore::new();
    store.seed_record(record(1));
    store.seed_record(record(3));

    let err = fast_runner()
        .apply_pending(&mut store, &numbered_set(3))
        .await
        .expect_err("v2 is missing from history");

    assert!(matches!(
        err,
        MigrationError::OutOfOrder { version: 2, highest_applied: 3, .. }
    ));
    assert!(store.statements().is_empty());
    assert_eq!(store.lock_holder(), None);
}

#[tokio::test]
async fn unknown_applied_versions_do_not_block_a_run() {
    let mut store = MemoryStore::new();
    store.seed_record(record(1));
    store.seed_record(record(2));
    store.seed_record(record(99));

    // Everything known is applied; v99 came from a newer build.
    let applied = fast_runner().apply_pending(&mut store, &numbered_set(2)).await.expect("run");
    assert_eq!(applied, 0);
}

// ============================================================
// Advisory lock
// ============================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_runners_are_serialized() {
    let first = MemoryStore::new();
    let second = first.session();
    let set = widgets_set();
    let runner = fast_runner();

    let tasks: Vec<_> = [first.session(), second]
        .into_iter()
        .map(|mut store| {
            let runner = runner.clone();
            let set = set.clone();
            tokio::spawn(async move { runner.apply_pending(&mut store, &set).await })
        })
        .collect();

    let mut total = 0;
    for task in tasks {
        total += task.await.expect("task panicked").expect("runner failed");
    }

    assert_eq!(total, 2);
    assert_eq!(first.applied_versions(), vec![1, 2]);
    assert_eq!(first.statements().len(), 3);
    assert_eq!(first.lock_holder(), None);
}

#[tokio::test(start_paused = true)]
async fn lock_held_past_timeout_fails_without_touching_the_store() {
    let mut holder = MemoryStore::new();
    let mut store = holder.session();
    let runner = MigrationRunner::new(RunnerConfig {
        lock_timeout: Duration::from_secs(1),
        ..RunnerConfig::default()
    });
    assert!(holder.try_lock(runner.config().lock_key).await.unwrap());

    let err = runner
        .apply_pending(&mut store, &widgets_set())
        .await
        .expect_err("lock is never released");

    assert!(matches!(err, MigrationError::LockTimeout { waited, .. } if waited >= Duration::from_secs(1)));
    assert!(!store.record_table_exists());
    assert_eq!(holder.lock_holder(), Some(holder.session_id()));
}

#[tokio::test(start_paused = true)]
async fn runner_waits_for_lock_release() {
    let mut holder = MemoryStore::new();
    let mut store = holder.session();
    let runner = MigrationRunner::default();
    assert!(holder.try_lock(runner.config().lock_key).await.unwrap());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(holder);
    });

    let applied = runner.apply_pending(&mut store, &widgets_set()).await.expect("lock frees up");
    assert_eq!(applied, 2);
}

// ============================================================
// Status
// ============================================================

#[tokio::test]
async fn status_reports_applied_and_pending() {
    let mut store = MemoryStore::new();
    let runner = fast_runner();
    runner.apply_pending(&mut store, &numbered_set(1)).await.expect("apply v1");
    store.seed_record(record(42));

    let report = runner.status(&mut store, &numbered_set(2)).await.expect("status");

    assert_eq!(report.migrations.len(), 2);
    assert!(matches!(report.migrations[0].state, MigrationState::Applied { .. }));
    assert_eq!(report.migrations[1].state, MigrationState::Pending);
    assert_eq!(report.pending_count(), 1);
    assert_eq!(report.unknown_applied, vec![42]);
    // Status never applies anything.
    assert_eq!(store.applied_versions(), vec![1, 42]);
}

#[tokio::test]
async fn status_on_fresh_store_is_all_pending_and_creates_nothing() {
    let mut store = MemoryStore::new();

    let report = fast_runner().status(&mut store, &widgets_set()).await.expect("status");

    assert_eq!(report.pending_count(), 2);
    assert!(report.unknown_applied.is_empty());
    assert!(!store.record_table_exists());
    assert_eq!(store.lock_acquisitions(), 0);
}
