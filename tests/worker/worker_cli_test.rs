//! Standalone worker command line.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

struct Scratch {
    dir: TempDir,
}

impl Scratch {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("hourglass.toml"),
            "[logging]\nfile = false\nlevel = \"warn\"\n",
        )
        .unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn worker(&self) -> Command {
        let mut cmd = Command::cargo_bin("hourglass-worker").unwrap();
        cmd.current_dir(self.path())
            .env("HOURGLASS_CONFIG", self.path().join("hourglass.toml"))
            .env_remove("HOURGLASS_MODE")
            .env_remove("HOURGLASS_DATABASE_PATH")
            .env_remove("HOURGLASS_MIGRATIONS_PATH")
            .env_remove("HOURGLASS_ENV");
        cmd
    }

    fn migrations(&self, files: &[(&str, &str)]) -> std::path::PathBuf {
        let dir = self.path().join("migrations");
        fs::create_dir_all(&dir).unwrap();
        for (name, sql) in files {
            fs::write(dir.join(name), sql).unwrap();
        }
        dir
    }
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_run_migrations_prints_success_response() {
    let scratch = Scratch::new();
    let migrations = scratch.migrations(&[(
        "0001_create_users.sql",
        "CREATE TABLE users (id INTEGER PRIMARY KEY);",
    )]);
    let db = scratch.path().join("cli.db");

    let output = scratch
        .worker()
        .arg("run-migrations")
        .arg("--migrations-path")
        .arg(&migrations)
        .arg("--database-path")
        .arg(&db)
        .output()
        .unwrap();

    assert!(output.status.success());
    let response = stdout_json(&output);
    assert_eq!(response["outcome"], "success");
    assert_eq!(response["payload"]["applied"][0], "0001_create_users.sql");
    assert!(db.is_file());
}

#[test]
fn test_development_mode_finds_local_migrations_directory() {
    let scratch = Scratch::new();
    scratch.migrations(&[("0001_t.sql", "CREATE TABLE t (id INTEGER);")]);
    let db = scratch.path().join("dev.db");

    let output = scratch
        .worker()
        .args(["--mode", "development", "run-migrations", "--database-path"])
        .arg(&db)
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["payload"]["migrationsPath"], "migrations");
}

#[test]
fn test_failing_migration_exits_nonzero() {
    let scratch = Scratch::new();
    let migrations = scratch.migrations(&[("0001_bad.sql", "NOT SQL AT ALL;")]);

    let output = scratch
        .worker()
        .arg("run-migrations")
        .arg("--migrations-path")
        .arg(&migrations)
        .arg("--database-path")
        .arg(scratch.path().join("bad.db"))
        .output()
        .unwrap();

    assert!(!output.status.success());
    let response = stdout_json(&output);
    assert_eq!(response["outcome"], "failure");
    assert_eq!(response["failure"]["code"], "OPERATION_FAILED");
}

#[test]
fn test_generate_schema_lists_tables() {
    let scratch = Scratch::new();
    let db = scratch.path().join("schema.db");
    let conn = rusqlite::Connection::open(&db).unwrap();
    conn.execute_batch("CREATE TABLE widgets (id INTEGER);").unwrap();
    drop(conn);

    let output = scratch
        .worker()
        .arg("generate-schema")
        .arg("--database-path")
        .arg(&db)
        .output()
        .unwrap();

    assert!(output.status.success());
    let response = stdout_json(&output);
    assert_eq!(response["payload"]["tables"], serde_json::json!(["widgets"]));
    assert!(response["payload"]["ddl"]
        .as_str()
        .unwrap()
        .contains("\"users\""));
}

#[test]
fn test_no_operation_is_usage_error() {
    let scratch = Scratch::new();
    scratch.worker().assert().failure().code(2);
}
