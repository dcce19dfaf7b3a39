//! Supervisor tests against the real `hourglass-worker` binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hourglass::bridge::protocol::RunMigrationsParams;
use hourglass::bridge::{BridgeError, BridgeOptions, Supervisor, WorkerEnvironment, WorkerState};
use hourglass::config::AppMode;
use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;

const WORKER: &str = env!("CARGO_BIN_EXE_hourglass-worker");

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn database_path(&self) -> PathBuf {
        self.dir.path().join("data").join("hourglass.db")
    }

    fn migrations(&self, files: &[(&str, &str)]) -> PathBuf {
        let dir = self.dir.path().join("migrations");
        fs::create_dir_all(&dir).unwrap();
        for (name, sql) in files {
            fs::write(dir.join(name), sql).unwrap();
        }
        dir
    }

    fn environment(&self) -> WorkerEnvironment {
        WorkerEnvironment::new(AppMode::Development, "supervisor-test")
            .with_database_path(self.database_path())
    }

    async fn open(&self) -> Supervisor {
        let options = BridgeOptions::new(WORKER, &self.environment())
            .with_timeout(Duration::from_secs(20))
            .with_shutdown_grace(Duration::from_secs(5));
        Supervisor::open(options).await.unwrap()
    }
}

fn params(migrations: &Path) -> RunMigrationsParams {
    RunMigrationsParams {
        migrations_path: Some(migrations.to_path_buf()),
        database_path: None,
    }
}

#[tokio::test]
async fn test_run_migrations_succeeds_and_reports_path() {
    let fixture = Fixture::new();
    let migrations = fixture.migrations(&[
        (
            "0001_create_users.sql",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT NOT NULL);",
        ),
        (
            "0002_add_email.sql",
            "ALTER TABLE users ADD COLUMN email TEXT;",
        ),
    ]);

    let bridge = fixture.open().await;
    assert_eq!(bridge.state().await, WorkerState::Running);
    assert!(bridge.pid().is_some());

    let result = bridge.run_migrations(params(&migrations)).await.unwrap();
    assert_eq!(result.migrations_path, migrations);
    assert_eq!(result.applied, vec!["0001_create_users.sql", "0002_add_email.sql"]);

    let again = bridge.run_migrations(params(&migrations)).await.unwrap();
    assert!(again.applied.is_empty());

    bridge.close().await;
    assert_eq!(bridge.state().await, WorkerState::Exited);

    let conn = Connection::open(fixture.database_path()).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_failed_migration_reports_reason_and_releases_storage() {
    let fixture = Fixture::new();
    let migrations = fixture.migrations(&[
        ("0001_ok.sql", "CREATE TABLE things (id INTEGER PRIMARY KEY);"),
        ("0002_broken.sql", "CREATE TABLE things (id INTEGER PRIMARY KEY);"),
    ]);

    let bridge = fixture.open().await;
    let err = bridge.run_migrations(params(&migrations)).await.unwrap_err();

    match &err {
        BridgeError::Operation { reason, trace } => {
            assert!(reason.contains("0002_broken.sql"), "{reason}");
            assert!(reason.contains("already exists"), "{reason}");
            assert!(trace.is_some());
        }
        other => panic!("expected operation error, got {other:?}"),
    }

    // The worker is still running but holds no connection
    assert_eq!(bridge.state().await, WorkerState::Running);
    let conn = Connection::open(fixture.database_path()).unwrap();
    conn.execute_batch("BEGIN EXCLUSIVE; COMMIT;").unwrap();

    // Only the successful file was recorded
    let versions: Vec<String> = conn
        .prepare("SELECT version FROM schema_migrations")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(versions, vec!["0001_ok.sql"]);

    bridge.close().await;
}

#[tokio::test]
async fn test_unsupported_operation() {
    let fixture = Fixture::new();
    let bridge = fixture.open().await;

    let err = bridge.call("compile-assets", json!({})).await.unwrap_err();
    assert_eq!(err.reason(), Some("unsupported operation"));
    assert!(matches!(err, BridgeError::Operation { trace: None, .. }));

    // The bridge is still usable afterwards
    let schema = bridge.generate_schema().await.unwrap();
    assert!(schema.ddl.contains("CREATE TABLE"));

    bridge.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent_and_rejects_later_calls() {
    let fixture = Fixture::new();
    let bridge = fixture.open().await;

    bridge.close().await;
    bridge.close().await;

    let err = bridge.generate_schema().await.unwrap_err();
    assert!(err.is_channel_error(), "{err:?}");
}

#[cfg(unix)]
mod scripted {
    use super::*;

    fn shell(script: &str) -> BridgeOptions {
        let env = WorkerEnvironment::new(AppMode::Development, "scripted");
        let mut options = BridgeOptions::new("/bin/sh", &env)
            .with_timeout(Duration::from_secs(10))
            .with_shutdown_grace(Duration::from_millis(500));
        options.args = vec!["-c".to_string(), script.to_string()];
        options
    }

    #[tokio::test]
    async fn test_worker_exit_mid_call_is_channel_error() {
        let bridge = Supervisor::open(shell("read line; exit 3")).await.unwrap();

        let err = bridge.call("generate-schema", json!({})).await.unwrap_err();
        assert!(err.is_channel_error(), "{err:?}");
        assert_eq!(bridge.state().await, WorkerState::Exited);

        bridge.close().await;
    }

    #[tokio::test]
    async fn test_real_worker_killed_externally() {
        let fixture = Fixture::new();
        let bridge = fixture.open().await;
        let pid = bridge.pid().unwrap();

        let status = std::process::Command::new("kill")
            .args(["-9", &pid.to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        // Wait for the monitor to observe the exit
        for _ in 0..100 {
            if bridge.state().await == WorkerState::Exited {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(bridge.state().await, WorkerState::Exited);

        let err = bridge.generate_schema().await.unwrap_err();
        assert!(err.is_channel_error(), "{err:?}");
        bridge.close().await;
    }

    #[tokio::test]
    async fn test_silent_worker_times_out_then_closes() {
        let bridge = Supervisor::open(shell("cat > /dev/null")).await.unwrap();

        let err = bridge
            .call_with_timeout("run-migrations", json!({}), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { .. }), "{err:?}");

        // The timed-out record is gone, so the same kind may be called again
        let err = bridge
            .call_with_timeout("run-migrations", json!({}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { .. }), "{err:?}");

        bridge.close().await;
        assert_eq!(bridge.state().await, WorkerState::Exited);
    }

    #[tokio::test]
    async fn test_close_kills_worker_that_ignores_eof() {
        let bridge = Supervisor::open(shell("trap '' TERM; exec 0<&-; sleep 30"))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        bridge.close().await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(bridge.state().await, WorkerState::Exited);
    }
}
