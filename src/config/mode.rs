//! Execution mode of the application.
//!
//! The mode selects the storage file name, the application data directory and
//! the environment file that gets loaded at startup. It is read from
//! `HOURGLASS_ENV` (falling back to the config file) and handed to the worker
//! through `HOURGLASS_MODE`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Environment variable that selects the mode for the host process.
pub const MODE_ENV_VAR: &str = "HOURGLASS_ENV";

/// Error returned when a mode string is not recognised.
#[derive(Debug, thiserror::Error)]
#[error("Unsupported mode: {0}. Supported: development, production")]
pub struct ModeError(pub String);

/// Development or production execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppMode {
    #[default]
    Development,
    Production,
}

impl AppMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppMode::Development => "development",
            AppMode::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, AppMode::Production)
    }

    /// Directory name under the platform data directory.
    pub fn app_dir_name(&self, app_name: &str) -> String {
        match self {
            AppMode::Development => format!("{}_dev", app_name),
            AppMode::Production => app_name.to_string(),
        }
    }

    /// File name of the SQLite database.
    pub fn database_file_name(&self, app_name: &str) -> String {
        match self {
            AppMode::Development => format!("{}.dev.db", app_name),
            AppMode::Production => format!("{}.db", app_name),
        }
    }

    /// Read the mode from `HOURGLASS_ENV`, if it is set.
    pub fn from_env() -> Result<Option<Self>, ModeError> {
        match std::env::var(MODE_ENV_VAR) {
            Ok(value) if !value.trim().is_empty() => value.parse().map(Some),
            _ => Ok(None),
        }
    }
}

impl FromStr for AppMode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(AppMode::Development),
            "production" | "prod" => Ok(AppMode::Production),
            other => Err(ModeError(other.to_string())),
        }
    }
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
