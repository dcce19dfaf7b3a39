//! Supervisor side of the worker bridge.
//!
//! [`Supervisor`] spawns `hourglass-worker --supervised`, exchanges NDJSON
//! messages with it, and turns them into ordinary async calls. See
//! [`crate::worker`] for the other end of the channel.
//!
//! # Example
//!
//! ```ignore
//! use hourglass::bridge::{resolve_worker_path, BridgeOptions, Supervisor, WorkerEnvironment};
//!
//! let env = WorkerEnvironment::new(mode, session_id).with_database_path(db_path);
//! let program = resolve_worker_path(settings.worker_path()?)?;
//! let bridge = Supervisor::open(BridgeOptions::new(program, &env)).await?;
//!
//! let result = bridge.run_migrations(Default::default()).await?;
//! println!("applied {:?} from {}", result.applied, result.migrations_path.display());
//!
//! bridge.close().await;
//! ```

pub mod environment;
mod error;
mod operations;
pub mod protocol;
mod supervisor;

pub use environment::WorkerEnvironment;
pub use error::{BridgeError, BridgeResult};
pub use operations::{DbOperations, DirectOperations};
pub use supervisor::{
    resolve_worker_path, BridgeOptions, Supervisor, WorkerState, DEFAULT_SHUTDOWN_GRACE,
    DEFAULT_TIMEOUT, WORKER_BINARY, WORKER_LOG_TARGET,
};
