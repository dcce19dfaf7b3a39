//! Worker-side error types.

use std::error::Error as StdError;

use thiserror::Error;

use crate::config::SettingsError;
use crate::db::{MigrationError, StorageError};

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors raised while executing an operation.
///
/// The `Display` text becomes the failure reason sent to the supervisor, so
/// storage and migration errors are transparent.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Config(#[from] SettingsError),

    #[error("invalid params for {kind}: {source}")]
    InvalidParams {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode result: {0}")]
    Encode(#[source] serde_json::Error),
}

impl From<rusqlite::Error> for WorkerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Sqlite(err))
    }
}

/// Render an error's cause chain, one cause per line.
///
/// Returns `None` when the error has no source.
pub fn error_trace(err: &(dyn StdError + 'static)) -> Option<String> {
    let mut causes = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        causes.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    if causes.is_empty() {
        None
    } else {
        Some(causes.join("\n"))
    }
}
