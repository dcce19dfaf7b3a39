//! Filesystem layout for packaged and development builds.
//!
//! A development build runs from the repository root, so migrations and the
//! env file live next to `Cargo.toml`. A packaged build ships them beside the
//! executable (or under the bundle's `Resources` / `share` directories).

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::mode::AppMode;
use super::settings::{SettingsError, APP_NAME};

/// Directory containing the running executable.
pub fn exe_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

/// Candidate migrations directories, in search order.
pub fn migrations_candidates(mode: AppMode) -> Vec<PathBuf> {
    match mode {
        AppMode::Development => vec![PathBuf::from("migrations")],
        AppMode::Production => match exe_dir() {
            Some(dir) => vec![
                dir.join("migrations"),
                dir.join("..").join("Resources").join("migrations"),
                dir.join("..").join("share").join(APP_NAME).join("migrations"),
            ],
            None => vec![PathBuf::from("migrations")],
        },
    }
}

/// Resolve the migrations directory.
///
/// An explicitly configured path must exist; otherwise the mode's candidate
/// locations are tried in order and the first existing one wins.
pub fn resolve_migrations_dir(
    mode: AppMode,
    configured: Option<PathBuf>,
) -> Result<PathBuf, SettingsError> {
    let candidates = match configured {
        Some(path) => vec![path],
        None => migrations_candidates(mode),
    };

    match candidates.iter().find(|p| p.is_dir()) {
        Some(found) => Ok(found.clone()),
        None => Err(SettingsError::MigrationsNotFound { tried: candidates }),
    }
}

/// Candidate env files, in search order.
pub fn env_file_candidates(mode: AppMode) -> Vec<PathBuf> {
    match mode {
        AppMode::Development => vec![PathBuf::from(".env.development")],
        AppMode::Production => match exe_dir() {
            Some(dir) => vec![
                dir.join(".env.production"),
                dir.join("..").join("Resources").join(".env.production"),
            ],
            None => vec![PathBuf::from(".env.production")],
        },
    }
}

/// Load the first env file that exists into the process environment.
///
/// Variables already present in the environment are not overridden. Returns
/// the path that was loaded, or `None` when no candidate exists.
pub fn load_env_file(mode: AppMode) -> Option<PathBuf> {
    let candidates = env_file_candidates(mode);
    load_first_env_file(&candidates)
}

fn load_first_env_file(candidates: &[PathBuf]) -> Option<PathBuf> {
    for path in candidates {
        if !path.is_file() {
            debug!(path = %path.display(), "env file not present");
            continue;
        }
        match dotenvy::from_path(path) {
            Ok(()) => {
                info!(path = %path.display(), "loaded environment file");
                return Some(path.clone());
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load environment file");
            }
        }
    }

    warn!(
        tried = ?candidates,
        "no environment file found, continuing with defaults"
    );
    None
}
