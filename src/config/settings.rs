//! TOML-based configuration for Hourglass.
//!
//! Supports a config file (hourglass.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [app]
//! mode = "production"
//!
//! [database]
//! path = "${HOME}/hourglass/hourglass.db"
//! migrations_path = "./migrations"
//! busy_timeout_ms = 5000
//!
//! [worker]
//! path = "./target/debug/hourglass-worker"
//! timeout_secs = 30
//! shutdown_grace_ms = 2000
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::mode::{AppMode, ModeError};
use super::paths;

/// Name used for the data directory, database file and worker binary.
pub const APP_NAME: &str = "hourglass";

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error(transparent)]
    Mode(#[from] ModeError),

    #[error("Could not determine the platform data directory")]
    NoDataDir,

    #[error("Could not find migrations directory. Tried: {}", display_paths(.tried))]
    MigrationsNotFound { tried: Vec<PathBuf> },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Settings {
    pub app: AppSettings,
    pub database: DatabaseSettings,
    pub worker: WorkerSettings,
    pub logging: LoggingSettings,
}

/// Application identity and mode.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppSettings {
    /// Application name used for directories and file names.
    pub name: String,

    /// Execution mode. `HOURGLASS_ENV` takes precedence when set.
    pub mode: Option<AppMode>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: APP_NAME.to_string(),
            mode: None,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Explicit path to the SQLite file (supports ${ENV_VAR} expansion).
    pub path: Option<String>,

    /// Explicit migrations directory (supports ${ENV_VAR} expansion).
    pub migrations_path: Option<String>,

    /// SQLite busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: None,
            migrations_path: None,
            busy_timeout_ms: 5000,
        }
    }
}

/// Worker process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Path to the worker binary (searched for when unset).
    pub path: Option<String>,

    /// Per-call timeout in seconds.
    pub timeout_secs: u64,

    /// How long `close()` waits for a graceful exit before killing the worker.
    pub shutdown_grace_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            path: None,
            timeout_secs: 30,
            shutdown_grace_ms: 2000,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `HOURGLASS_LOG` is not set.
    pub level: String,

    /// Emit JSON lines on the console instead of the human format.
    pub json: bool,

    /// Write a per-session log file.
    pub file: bool,

    /// Override for the log directory.
    pub directory: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: true,
            directory: None,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `HOURGLASS_CONFIG`
    /// 2. `./hourglass.toml`
    /// 3. `~/.config/hourglass/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("HOURGLASS_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("hourglass.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(APP_NAME).join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Resolve the execution mode: `HOURGLASS_ENV`, then config, then development.
    pub fn mode(&self) -> Result<AppMode, SettingsError> {
        if let Some(mode) = AppMode::from_env()? {
            return Ok(mode);
        }
        Ok(self.app.mode.unwrap_or_default())
    }

    /// Application data directory for the given mode.
    pub fn data_dir(&self, mode: AppMode) -> Result<PathBuf, SettingsError> {
        let base = dirs::data_dir().ok_or(SettingsError::NoDataDir)?;
        Ok(base.join(mode.app_dir_name(&self.app.name)))
    }

    /// Path to the SQLite database file.
    pub fn database_path(&self, mode: AppMode) -> Result<PathBuf, SettingsError> {
        match &self.database.path {
            Some(path) => Ok(PathBuf::from(expand_env_vars(path)?)),
            None => Ok(self
                .data_dir(mode)?
                .join(mode.database_file_name(&self.app.name))),
        }
    }

    /// Migrations directory, searching the packaged locations when unset.
    pub fn migrations_path(&self, mode: AppMode) -> Result<PathBuf, SettingsError> {
        let configured = match &self.database.migrations_path {
            Some(path) => Some(PathBuf::from(expand_env_vars(path)?)),
            None => None,
        };
        paths::resolve_migrations_dir(mode, configured)
    }

    /// Directory for session log files.
    pub fn log_directory(&self, mode: AppMode) -> Result<PathBuf, SettingsError> {
        match &self.logging.directory {
            Some(dir) => Ok(PathBuf::from(expand_env_vars(dir)?)),
            None => Ok(self.data_dir(mode)?.join("logs").join(mode.as_str())),
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.database.busy_timeout_ms)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker.timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.worker.shutdown_grace_ms)
    }

    /// Get the configured worker binary path, if any.
    pub fn worker_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        match &self.worker.path {
            Some(path) => Ok(Some(PathBuf::from(expand_env_vars(path)?))),
            None => Ok(None),
        }
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if !(ch.is_alphanumeric() || ch == '_') {
                    break;
                }
                var_name.push(ch);
                chars.next();
            }
        }

        if var_name.is_empty() {
            result.push('$');
            continue;
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
