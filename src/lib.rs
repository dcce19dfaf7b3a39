//! # Hourglass
//!
//! A desktop-style application core whose storage maintenance runs in a
//! supervised worker process.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 app::App::bootstrap                     │
//! │   open bridge → run-migrations → close → open storage   │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [bridge]
//! ┌─────────────────────────────────────────────────────────┐
//! │        Supervisor (NDJSON over worker stdio)            │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [worker]
//! ┌─────────────────────────────────────────────────────────┐
//! │        hourglass-worker: Dispatcher → db::migrate       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [db]
//! ┌─────────────────────────────────────────────────────────┐
//! │                  SQLite storage file                    │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod app;
pub mod bridge;
pub mod config;
pub mod db;
pub mod ipc;
pub mod logging;
pub mod worker;

pub use app::{App, AppError, StartupPlan};
pub use bridge::{BridgeError, DbOperations, Supervisor};
pub use config::{AppMode, Settings};
