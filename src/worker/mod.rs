//! Worker runtime.
//!
//! The worker executes operations that must not share a storage connection
//! with the main application, such as applying migrations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Hourglass application (Tokio)                 │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                   bridge::Supervisor                      │  │
//! │  │  - Spawns hourglass-worker --supervised                   │  │
//! │  │  - One pending call per operation kind                    │  │
//! │  │  - Per-call timeout, orphaned responses discarded         │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                              │                                   │
//! │               stdin (NDJSON) │ stdout (NDJSON: response | log)  │
//! │                              ▼                                   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │   hourglass-worker: runtime::serve → Dispatcher (one at a time) │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Launched without `--supervised`, the same [`Dispatcher`] runs a single
//! operation from the command line.

mod config;
mod dispatch;
mod error;
pub mod forward;
pub mod runtime;

pub use config::WorkerConfig;
pub use dispatch::{parse_request, Dispatcher, Operation};
pub use error::{error_trace, WorkerError, WorkerResult};
