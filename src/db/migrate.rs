//! Ordered, checksummed SQL migrations.
//!
//! Files named `NNNN_name.sql` are applied in ascending filename order, each
//! inside its own transaction. Applied files are recorded in
//! `schema_migrations` with the SHA-256 of their content (comments and blank
//! lines stripped); editing an applied file is an error.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use regex::Regex;
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migrations directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("failed to read migrations directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid migration file name {0}: expected NNNN_name.sql")]
    InvalidName(String),

    #[error("migration {0} edited after application")]
    Edited(String),

    #[error("migration {file} failed: {source}")]
    Failed {
        file: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("migration bookkeeping failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

/// A migration file found on disk.
#[derive(Debug, Clone)]
pub struct MigrationFile {
    pub name: String,
    pub sql: String,
    pub checksum: String,
}

const NAME_PATTERN: &str = r"^\d{4,}_[A-Za-z0-9_]+\.sql$";

/// Strip comment-only and blank lines before hashing.
fn cleaned(sql: &str) -> String {
    sql.lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.is_empty() || t.starts_with("--"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn checksum(sql: &str) -> String {
    format!("{:x}", Sha256::digest(cleaned(sql).as_bytes()))
}

/// List the migration files in `dir`, sorted by name.
///
/// Non-`.sql` entries are ignored; `.sql` files that do not follow the naming
/// pattern are rejected.
pub fn discover(dir: &Path) -> Result<Vec<MigrationFile>, MigrationError> {
    if !dir.is_dir() {
        return Err(MigrationError::DirectoryNotFound(dir.to_path_buf()));
    }

    let pattern = Regex::new(NAME_PATTERN)?;
    let read_err = |source| MigrationError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| MigrationError::InvalidName(path.display().to_string()))?;
        if !pattern.is_match(&name) {
            return Err(MigrationError::InvalidName(name));
        }
        let sql = fs::read_to_string(&path).map_err(read_err)?;
        let checksum = checksum(&sql);
        files.push(MigrationFile {
            name,
            sql,
            checksum,
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

fn ensure_bookkeeping(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL,
            checksum   TEXT NOT NULL
        )",
    )
}

/// Applied migration names mapped to their recorded checksums.
pub fn applied_migrations(conn: &Connection) -> Result<HashMap<String, String>, MigrationError> {
    ensure_bookkeeping(conn)?;
    let mut stmt = conn.prepare("SELECT version, checksum FROM schema_migrations")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let mut applied = HashMap::new();
    for row in rows {
        let (version, checksum): (String, String) = row?;
        applied.insert(version, checksum);
    }
    Ok(applied)
}

/// Migration files in `dir` not yet applied.
pub fn pending(conn: &Connection, dir: &Path) -> Result<Vec<String>, MigrationError> {
    let applied = applied_migrations(conn)?;
    Ok(discover(dir)?
        .into_iter()
        .filter(|file| !applied.contains_key(&file.name))
        .map(|file| file.name)
        .collect())
}

/// Apply every pending migration in `dir`. Returns the files applied, in order.
///
/// Stops at the first failure; files before it stay applied, the failing one
/// is rolled back.
pub fn apply_migrations(conn: &mut Connection, dir: &Path) -> Result<Vec<String>, MigrationError> {
    let files = discover(dir)?;
    let applied = applied_migrations(conn)?;
    let mut newly_applied = Vec::new();

    for file in files {
        if let Some(stored) = applied.get(&file.name) {
            if stored != &file.checksum {
                error!(file = %file.name, "applied migration was edited");
                return Err(MigrationError::Edited(file.name));
            }
            debug!(file = %file.name, "migration already applied");
            continue;
        }

        info!(file = %file.name, "applying migration");
        let failed = |source| MigrationError::Failed {
            file: file.name.clone(),
            source,
        };

        let tx = conn.transaction().map_err(failed)?;
        if let Err(e) = tx.execute_batch(&file.sql) {
            error!(file = %file.name, error = %e, "migration failed, rolling back");
            return Err(failed(e));
        }
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at, checksum) VALUES (?1, ?2, ?3)",
            params![file.name, Utc::now().to_rfc3339(), file.checksum],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;

        info!(file = %file.name, "migration applied");
        newly_applied.push(file.name);
    }

    if newly_applied.is_empty() {
        info!(dir = %dir.display(), "no pending migrations");
    }
    Ok(newly_applied)
}
