//! Wire-level tests: raw NDJSON in, NDJSON out of `hourglass-worker --supervised`.

use std::fs;
use std::io::Write;
use std::process::{Command, Stdio};

use serde_json::{json, Value};

const WORKER: &str = env!("CARGO_BIN_EXE_hourglass-worker");

/// Feed `lines` to a supervised worker, close stdin and collect every message.
fn exchange(db_path: &std::path::Path, lines: &[String]) -> (Vec<Value>, i32) {
    let mut child = Command::new(WORKER)
        .arg("--supervised")
        .env("HOURGLASS_MODE", "development")
        .env("HOURGLASS_SESSION_ID", "wire-test")
        .env("HOURGLASS_DATABASE_PATH", db_path)
        .env("HOURGLASS_LOG", "info")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .unwrap();

    {
        let mut stdin = child.stdin.take().unwrap();
        for line in lines {
            writeln!(stdin, "{line}").unwrap();
        }
    }

    let output = child.wait_with_output().unwrap();
    let messages = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    (messages, output.status.code().unwrap_or(-1))
}

fn responses(messages: &[Value]) -> Vec<&Value> {
    messages.iter().filter(|m| m["type"] == "response").collect()
}

#[test]
fn test_responses_follow_request_order_and_worker_exits_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    fs::create_dir(&migrations).unwrap();
    fs::write(
        migrations.join("0001_create_notes.sql"),
        "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);",
    )
    .unwrap();

    let lines = vec![
        json!({
            "id": "a",
            "kind": "run-migrations",
            "params": { "migrationsPath": migrations }
        })
        .to_string(),
        "{not json".to_string(),
        json!({ "id": "c", "kind": "generate-schema" }).to_string(),
        json!({ "id": "d", "kind": "explode" }).to_string(),
    ];

    let (messages, code) = exchange(&dir.path().join("wire.db"), &lines);
    assert_eq!(code, 0);

    let responses = responses(&messages);
    assert_eq!(responses.len(), 4);

    assert_eq!(responses[0]["id"], "a");
    assert_eq!(responses[0]["kind"], "run-migrations");
    assert_eq!(responses[0]["outcome"], "success");
    assert_eq!(responses[0]["payload"]["applied"], json!(["0001_create_notes.sql"]));
    assert_eq!(
        responses[0]["payload"]["migrationsPath"],
        json!(migrations)
    );

    assert_eq!(responses[1]["id"], Value::Null);
    assert_eq!(responses[1]["failure"]["code"], "MALFORMED_REQUEST");

    assert_eq!(responses[2]["id"], "c");
    assert_eq!(responses[2]["outcome"], "success");
    let tables = responses[2]["payload"]["tables"].as_array().unwrap();
    assert!(tables.contains(&json!("notes")));

    assert_eq!(responses[3]["id"], "d");
    assert_eq!(responses[3]["failure"]["code"], "UNSUPPORTED_OPERATION");
    assert_eq!(responses[3]["failure"]["reason"], "unsupported operation");
}

#[test]
fn test_worker_forwards_logs_as_messages() {
    let dir = tempfile::tempdir().unwrap();
    let lines = vec![json!({ "id": "x", "kind": "generate-schema" }).to_string()];

    let (messages, code) = exchange(&dir.path().join("logs.db"), &lines);
    assert_eq!(code, 0);

    let logs: Vec<&Value> = messages.iter().filter(|m| m["type"] == "log").collect();
    assert!(!logs.is_empty());
    for log in &logs {
        assert!(log["level"].is_string());
        assert!(log["data"].is_array());
    }
    assert!(logs
        .iter()
        .any(|log| log["data"].to_string().contains("worker ready")));
}

#[test]
fn test_missing_kind_echoes_id() {
    let dir = tempfile::tempdir().unwrap();
    let lines = vec![json!({ "id": "only-id" }).to_string()];

    let (messages, _) = exchange(&dir.path().join("m.db"), &lines);
    let responses = responses(&messages);

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["id"], "only-id");
    assert_eq!(responses[0]["kind"], Value::Null);
    assert_eq!(responses[0]["failure"]["code"], "MALFORMED_REQUEST");
}

#[test]
fn test_failed_migration_carries_trace() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    fs::create_dir(&migrations).unwrap();
    fs::write(migrations.join("0001_bad.sql"), "CREATE TABLE (;").unwrap();

    let lines = vec![json!({
        "id": "m",
        "kind": "run-migrations",
        "params": { "migrationsPath": migrations }
    })
    .to_string()];

    let (messages, code) = exchange(&dir.path().join("bad.db"), &lines);
    assert_eq!(code, 0);

    let responses = responses(&messages);
    assert_eq!(responses[0]["outcome"], "failure");
    assert_eq!(responses[0]["failure"]["code"], "OPERATION_FAILED");
    let reason = responses[0]["failure"]["reason"].as_str().unwrap();
    assert!(reason.starts_with("migration 0001_bad.sql failed"), "{reason}");
    assert!(responses[0]["failure"]["trace"].is_string());
}
