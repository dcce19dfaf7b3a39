//! Explicit configuration for the worker runtime.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::bridge::environment::{
    DATABASE_PATH_VAR, MIGRATIONS_PATH_VAR, MODE_VAR, SESSION_ID_VAR,
};
use crate::config::{AppMode, Settings, SettingsError};
use crate::db::DEFAULT_BUSY_TIMEOUT;

/// Everything an operation needs to know about its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub mode: AppMode,
    pub session_id: String,
    pub database_path: PathBuf,
    /// Explicit migrations directory. When unset the mode's default
    /// locations are searched at operation time.
    pub migrations_path: Option<PathBuf>,
    pub busy_timeout: Duration,
}

impl WorkerConfig {
    pub fn new(mode: AppMode, database_path: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            session_id: Uuid::new_v4().to_string(),
            database_path: database_path.into(),
            migrations_path: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_migrations_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.migrations_path = Some(path.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Build from the process environment, falling back to `settings`.
    pub fn from_env(settings: &Settings) -> Result<Self, SettingsError> {
        Self::from_lookup(settings, |key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup, falling back to `settings`.
    pub fn from_lookup<F>(settings: &Settings, lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = match lookup(MODE_VAR) {
            Some(value) => value.parse::<AppMode>()?,
            None => settings.mode()?,
        };

        let database_path = match lookup(DATABASE_PATH_VAR) {
            Some(path) => PathBuf::from(path),
            None => settings.database_path(mode)?,
        };

        let migrations_path = match lookup(MIGRATIONS_PATH_VAR) {
            Some(path) => Some(PathBuf::from(path)),
            None => settings
                .database
                .migrations_path
                .as_deref()
                .map(crate::config::expand_env_vars)
                .transpose()?
                .map(PathBuf::from),
        };

        Ok(Self {
            mode,
            session_id: lookup(SESSION_ID_VAR).unwrap_or_else(|| Uuid::new_v4().to_string()),
            database_path,
            migrations_path,
            busy_timeout: settings.busy_timeout(),
        })
    }
}
