//! Startup sequencing through the real worker process.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hourglass::bridge::BridgeError;
use hourglass::config::AppMode;
use hourglass::db::NewUser;
use hourglass::ipc;
use hourglass::{App, AppError, StartupPlan};
use serde_json::{json, Value};

const WORKER: &str = env!("CARGO_BIN_EXE_hourglass-worker");

fn plan(dir: &Path, migrations: impl Into<PathBuf>) -> StartupPlan {
    let mut plan = StartupPlan::new(
        AppMode::Development,
        "bootstrap-test",
        dir.join("hourglass.dev.db"),
        migrations,
    );
    plan.worker_path = Some(PathBuf::from(WORKER));
    plan.worker_timeout = Duration::from_secs(20);
    plan
}

fn shipped_migrations() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
}

#[tokio::test]
async fn test_bootstrap_migrates_then_opens_storage() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::bootstrap(plan(dir.path(), shipped_migrations()))
        .await
        .unwrap();

    assert_eq!(app.mode(), AppMode::Development);
    assert_eq!(app.migrations().migrations_path, shipped_migrations());
    assert!(app
        .migrations()
        .applied
        .contains(&"0001_create_users.sql".to_string()));

    // The worker is gone, so the main connection can take an exclusive lock
    app.storage()
        .connection()
        .execute_batch("BEGIN EXCLUSIVE; COMMIT;")
        .unwrap();

    let user = app
        .users()
        .insert(&NewUser {
            username: "ada".to_string(),
            email: "ada@example.com".to_string(),
        })
        .unwrap();
    let response = ipc::handle(&app.users(), ipc::channels::GET_LIST, Value::Null);
    assert_eq!(response.code, ipc::codes::OK);
    assert_eq!(response.data.unwrap()[0]["id"], json!(user.id));

    app.close().unwrap();
}

#[tokio::test]
async fn test_second_bootstrap_applies_nothing() {
    let dir = tempfile::tempdir().unwrap();

    App::bootstrap(plan(dir.path(), shipped_migrations()))
        .await
        .unwrap()
        .close()
        .unwrap();
    let again = App::bootstrap(plan(dir.path(), shipped_migrations()))
        .await
        .unwrap();

    assert!(again.migrations().applied.is_empty());
    again.close().unwrap();
}

#[tokio::test]
async fn test_migration_failure_aborts_startup() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    fs::create_dir(&migrations).unwrap();
    fs::write(migrations.join("0001_broken.sql"), "CREATE TABLE;").unwrap();

    let err = App::bootstrap(plan(dir.path(), &migrations))
        .await
        .unwrap_err();

    match err {
        AppError::Bridge(BridgeError::Operation { reason, .. }) => {
            assert!(reason.starts_with("migration 0001_broken.sql failed"), "{reason}");
        }
        other => panic!("expected operation error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_worker_binary_is_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut plan = plan(dir.path(), shipped_migrations());
    plan.worker_path = Some(dir.path().join("no-such-worker"));

    let err = App::bootstrap(plan).await.unwrap_err();
    assert!(matches!(err, AppError::Bridge(BridgeError::Spawn(_))), "{err:?}");
}

#[tokio::test]
async fn test_direct_bootstrap_matches_supervised_result() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::bootstrap_direct(plan(dir.path(), shipped_migrations()))
        .await
        .unwrap();

    assert!(!app.migrations().applied.is_empty());
    assert_eq!(app.session_id(), "bootstrap-test");
    app.close().unwrap();
}
