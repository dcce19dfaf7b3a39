//! Process environment handed to a supervised worker.

use std::path::PathBuf;

use crate::config::AppMode;

use super::protocol::RequestContext;

/// Command-line flag that selects the channel-mediated dispatch path.
pub const SUPERVISED_FLAG: &str = "--supervised";

pub const MODE_VAR: &str = "HOURGLASS_MODE";
pub const SESSION_ID_VAR: &str = "HOURGLASS_SESSION_ID";
pub const DATABASE_PATH_VAR: &str = "HOURGLASS_DATABASE_PATH";
pub const MIGRATIONS_PATH_VAR: &str = "HOURGLASS_MIGRATIONS_PATH";

/// Values the worker needs at spawn time.
///
/// Paths are resolved by the caller; the bridge never discovers them itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEnvironment {
    pub mode: AppMode,
    pub session_id: String,
    pub database_path: Option<PathBuf>,
    pub migrations_path: Option<PathBuf>,
}

impl WorkerEnvironment {
    pub fn new(mode: AppMode, session_id: impl Into<String>) -> Self {
        Self {
            mode,
            session_id: session_id.into(),
            database_path: None,
            migrations_path: None,
        }
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn with_migrations_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.migrations_path = Some(path.into());
        self
    }

    /// Environment variables to set on the child process.
    pub fn vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            (MODE_VAR.to_string(), self.mode.as_str().to_string()),
            (SESSION_ID_VAR.to_string(), self.session_id.clone()),
        ];
        if let Some(path) = &self.database_path {
            vars.push((DATABASE_PATH_VAR.to_string(), path.display().to_string()));
        }
        if let Some(path) = &self.migrations_path {
            vars.push((MIGRATIONS_PATH_VAR.to_string(), path.display().to_string()));
        }
        vars
    }

    /// Context attached to every request sent on this bridge.
    pub fn context(&self) -> RequestContext {
        RequestContext {
            mode: self.mode,
            session_id: self.session_id.clone(),
        }
    }
}
