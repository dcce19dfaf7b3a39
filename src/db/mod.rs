//! Local SQLite storage.
//!
//! A [`Storage`] owns exactly one connection. The worker opens one per
//! operation and closes it before answering; the application opens its own
//! only after migrations have finished.

pub mod migrate;
pub mod schema;
pub mod users;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;
use tracing::debug;

pub use migrate::{apply_migrations, MigrationError};
pub use users::{NewUser, User, UserInput, UserStore, UserUpdate};

/// Default SQLite busy timeout.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to prepare storage directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    Invalid(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A single scoped connection to the storage file.
#[derive(Debug)]
pub struct Storage {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Storage {
    /// Open (creating if needed) the SQLite file at `path`.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        configure(&conn, busy_timeout)?;
        debug!(path = %path.display(), "opened storage connection");

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn, DEFAULT_BUSY_TIMEOUT)?;
        Ok(Self { conn, path: None })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Backing file, or `None` for in-memory storage.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Close the connection, reporting any error SQLite raises while doing so.
    pub fn close(self) -> StorageResult<()> {
        let path = self.path;
        self.conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;
        if let Some(path) = path {
            debug!(path = %path.display(), "closed storage connection");
        }
        Ok(())
    }
}

fn configure(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(busy_timeout)
}
