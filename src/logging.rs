//! Subscriber installation.
//!
//! The application logs to stderr and to a per-session file under
//! `<log dir>/<YYYY-MM-DD>/<session_id>.log`. A supervised worker instead
//! forwards every event to its supervisor over the channel.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{Local, NaiveDate};
use tokio::sync::mpsc::UnboundedSender;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

use crate::bridge::protocol::WorkerMessage;
use crate::config::{AppMode, Settings};
use crate::worker::forward::ForwardMakeWriter;

/// Filter directives override, e.g. `HOURGLASS_LOG=hourglass=debug`.
pub const LOG_ENV_VAR: &str = "HOURGLASS_LOG";

/// Keeps the file writer flushing until dropped.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
    file_path: Option<PathBuf>,
}

impl LogGuard {
    /// Path of this session's log file, when file logging is enabled.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(default))
}

/// Session log file location for `date`.
pub fn session_log_path(dir: &Path, session_id: &str, date: NaiveDate) -> PathBuf {
    dir.join(date.format("%Y-%m-%d").to_string())
        .join(format!("{session_id}.log"))
}

/// Install the application subscriber.
///
/// A subscriber that is already installed is left in place.
pub fn init_logging(
    settings: &Settings,
    mode: AppMode,
    session_id: &str,
) -> anyhow::Result<LogGuard> {
    let level = settings.logging.level.as_str();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console = fmt::layer().with_writer(std::io::stderr).with_target(true);
    if settings.logging.json {
        layers.push(console.json().with_filter(env_filter(level)).boxed());
    } else {
        layers.push(console.with_filter(env_filter(level)).boxed());
    }

    let mut guard = LogGuard {
        _file: None,
        file_path: None,
    };

    if settings.logging.file {
        let dir = settings.log_directory(mode)?;
        let path = session_log_path(&dir, session_id, Local::now().date_naive());
        let (parent, file_name) = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => (parent.to_path_buf(), name.to_owned()),
            _ => anyhow::bail!("invalid log path {}", path.display()),
        };
        fs::create_dir_all(&parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;

        let (writer, file_guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(&parent, file_name));
        layers.push(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_filter(env_filter(level))
                .boxed(),
        );

        guard._file = Some(file_guard);
        guard.file_path = Some(path);
    }

    if tracing_subscriber::registry().with(layers).try_init().is_err() {
        tracing::debug!("subscriber already installed");
    }
    if let Some(path) = guard.file_path() {
        tracing::info!(path = %path.display(), session = session_id, "session log file");
    }

    Ok(guard)
}

/// Install the supervised worker's subscriber: every event becomes a `log`
/// message on the outbound queue.
pub fn init_worker_forwarding(outbox: UnboundedSender<WorkerMessage>, level: &str) {
    let layer = fmt::layer()
        .with_writer(ForwardMakeWriter::new(outbox))
        .with_ansi(false)
        .without_time()
        .with_level(false)
        .with_filter(env_filter(level));

    let _ = tracing_subscriber::registry().with(layer).try_init();
}
