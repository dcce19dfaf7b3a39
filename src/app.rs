//! Application startup.
//!
//! Migrations run out of process first. The worker is closed before the
//! application opens its own connection, so the two never hold the storage
//! file at the same time.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::bridge::protocol::{RunMigrationsParams, RunMigrationsResult};
use crate::bridge::{
    resolve_worker_path, BridgeError, BridgeOptions, DbOperations, DirectOperations, Supervisor,
    WorkerEnvironment,
};
use crate::config::{AppMode, Settings, SettingsError};
use crate::db::{Storage, StorageError, UserStore};
use crate::worker::{Dispatcher, WorkerConfig};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type AppResult<T> = Result<T, AppError>;

/// Resolved locations and timings for one application session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupPlan {
    pub mode: AppMode,
    pub session_id: String,
    pub database_path: PathBuf,
    pub migrations_path: PathBuf,
    pub busy_timeout: Duration,
    pub worker_path: Option<PathBuf>,
    pub worker_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl StartupPlan {
    pub fn new(
        mode: AppMode,
        session_id: impl Into<String>,
        database_path: impl Into<PathBuf>,
        migrations_path: impl Into<PathBuf>,
    ) -> Self {
        let defaults = Settings::default();
        Self {
            mode,
            session_id: session_id.into(),
            database_path: database_path.into(),
            migrations_path: migrations_path.into(),
            busy_timeout: defaults.busy_timeout(),
            worker_path: None,
            worker_timeout: defaults.worker_timeout(),
            shutdown_grace: defaults.shutdown_grace(),
        }
    }

    pub fn from_settings(settings: &Settings, session_id: impl Into<String>) -> AppResult<Self> {
        let mode = settings.mode()?;
        Ok(Self {
            mode,
            session_id: session_id.into(),
            database_path: settings.database_path(mode)?,
            migrations_path: settings.migrations_path(mode)?,
            busy_timeout: settings.busy_timeout(),
            worker_path: settings.worker_path()?,
            worker_timeout: settings.worker_timeout(),
            shutdown_grace: settings.shutdown_grace(),
        })
    }

    /// Environment for a supervised worker serving this session.
    pub fn worker_environment(&self) -> WorkerEnvironment {
        WorkerEnvironment::new(self.mode, self.session_id.clone())
            .with_database_path(&self.database_path)
            .with_migrations_path(&self.migrations_path)
    }

    /// Configuration for running operations in this process.
    pub fn worker_config(&self) -> WorkerConfig {
        let mut config = WorkerConfig::new(self.mode, &self.database_path)
            .with_migrations_path(&self.migrations_path)
            .with_session_id(self.session_id.clone());
        config.busy_timeout = self.busy_timeout;
        config
    }

    fn migration_params(&self) -> RunMigrationsParams {
        RunMigrationsParams {
            migrations_path: Some(self.migrations_path.clone()),
            database_path: Some(self.database_path.clone()),
        }
    }
}

/// A running application session holding the main storage connection.
#[derive(Debug)]
pub struct App {
    plan: StartupPlan,
    storage: Storage,
    migrations: RunMigrationsResult,
}

impl App {
    /// Migrate through a supervised worker, close it, then open storage.
    pub async fn bootstrap(plan: StartupPlan) -> AppResult<Self> {
        let program = resolve_worker_path(plan.worker_path.clone())?;
        let options = BridgeOptions::new(program, &plan.worker_environment())
            .with_timeout(plan.worker_timeout)
            .with_shutdown_grace(plan.shutdown_grace);
        let bridge = Supervisor::open(options).await?;
        info!(pid = ?bridge.pid(), "migration worker started");

        Self::bootstrap_with(plan, &bridge).await
    }

    /// Same sequence, executing operations in this process.
    pub async fn bootstrap_direct(plan: StartupPlan) -> AppResult<Self> {
        let ops = DirectOperations::new(Dispatcher::new(plan.worker_config()));
        Self::bootstrap_with(plan, &ops).await
    }

    /// Run migrations through `ops`, shut it down, and only then open the
    /// main storage connection.
    ///
    /// `ops` is shut down whether or not the migrations succeed.
    pub async fn bootstrap_with(plan: StartupPlan, ops: &dyn DbOperations) -> AppResult<Self> {
        let outcome = ops.run_migrations(plan.migration_params()).await;
        ops.shutdown().await;

        let migrations = match outcome {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "migrations failed, aborting startup");
                return Err(err.into());
            }
        };
        info!(
            applied = migrations.applied.len(),
            path = %migrations.migrations_path.display(),
            "migrations complete"
        );

        let storage = Storage::open(&plan.database_path, plan.busy_timeout)?;
        Ok(Self {
            plan,
            storage,
            migrations,
        })
    }

    pub fn mode(&self) -> AppMode {
        self.plan.mode
    }

    pub fn session_id(&self) -> &str {
        &self.plan.session_id
    }

    pub fn plan(&self) -> &StartupPlan {
        &self.plan
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Result of the startup migration run.
    pub fn migrations(&self) -> &RunMigrationsResult {
        &self.migrations
    }

    pub fn users(&self) -> UserStore<'_> {
        UserStore::new(self.storage.connection())
    }

    pub fn close(self) -> AppResult<()> {
        self.storage.close()?;
        Ok(())
    }
}
