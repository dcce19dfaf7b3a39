//! Configuration module for Hourglass.
//!
//! Handles the config file, execution mode, environment files and the
//! packaged vs. development filesystem layout.

mod mode;
pub mod paths;
mod settings;

pub use mode::{AppMode, ModeError, MODE_ENV_VAR};
pub use paths::{load_env_file, resolve_migrations_dir};
pub use settings::{
    expand_env_vars, AppSettings, DatabaseSettings, LoggingSettings, Settings, SettingsError,
    WorkerSettings, APP_NAME,
};
