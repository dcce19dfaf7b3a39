use std::fs;
use std::path::{Path, PathBuf};

use hourglass::db::migrate::{apply_migrations, pending, MigrationError};
use hourglass::db::schema::list_tables;
use hourglass::db::{Storage, DEFAULT_BUSY_TIMEOUT};
use rusqlite::Connection;

fn write(dir: &Path, name: &str, sql: &str) {
    fs::write(dir.join(name), sql).unwrap();
}

fn shipped_migrations() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
}

#[test]
fn test_applies_in_filename_order_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "0010_later.sql", "INSERT INTO log (step) VALUES ('ten');");
    write(dir.path(), "0002_second.sql", "INSERT INTO log (step) VALUES ('two');");
    write(dir.path(), "0001_first.sql", "CREATE TABLE log (n INTEGER PRIMARY KEY, step TEXT);");

    let mut conn = Connection::open_in_memory().unwrap();
    assert_eq!(
        pending(&conn, dir.path()).unwrap(),
        vec!["0001_first.sql", "0002_second.sql", "0010_later.sql"]
    );

    let applied = apply_migrations(&mut conn, dir.path()).unwrap();
    assert_eq!(applied.len(), 3);

    let steps: Vec<String> = conn
        .prepare("SELECT step FROM log ORDER BY n")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(steps, vec!["two", "ten"]);

    // A new file added later is the only one applied next time
    write(dir.path(), "0011_more.sql", "INSERT INTO log (step) VALUES ('eleven');");
    assert_eq!(
        apply_migrations(&mut conn, dir.path()).unwrap(),
        vec!["0011_more.sql"]
    );
}

#[test]
fn test_edited_migration_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "0001_init.sql", "CREATE TABLE a (id INTEGER);");

    let mut conn = Connection::open_in_memory().unwrap();
    apply_migrations(&mut conn, dir.path()).unwrap();

    // Comment-only edits keep the checksum
    write(
        dir.path(),
        "0001_init.sql",
        "-- create the a table\nCREATE TABLE a (id INTEGER);\n\n",
    );
    assert!(apply_migrations(&mut conn, dir.path()).unwrap().is_empty());

    write(dir.path(), "0001_init.sql", "CREATE TABLE a (id INTEGER, extra TEXT);");
    let err = apply_migrations(&mut conn, dir.path()).unwrap_err();
    assert!(matches!(err, MigrationError::Edited(ref name) if name == "0001_init.sql"));
    assert_eq!(err.to_string(), "migration 0001_init.sql edited after application");
}

#[test]
fn test_invalid_file_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "create_users.sql", "CREATE TABLE x (id INTEGER);");

    let mut conn = Connection::open_in_memory().unwrap();
    let err = apply_migrations(&mut conn, dir.path()).unwrap_err();
    assert!(matches!(err, MigrationError::InvalidName(_)));
}

#[test]
fn test_shipped_migrations_create_users_table() {
    let dir = tempfile::tempdir().unwrap();
    let mut storage = Storage::open(dir.path().join("app.db"), DEFAULT_BUSY_TIMEOUT).unwrap();

    let applied = apply_migrations(storage.connection_mut(), &shipped_migrations()).unwrap();
    assert_eq!(applied.first().map(String::as_str), Some("0001_create_users.sql"));

    let tables = list_tables(storage.connection()).unwrap();
    assert!(tables.contains(&"users".to_string()));
    assert!(tables.contains(&"schema_migrations".to_string()));
    storage.close().unwrap();
}
