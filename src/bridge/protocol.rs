//! Protocol types for supervisor/worker communication.
//!
//! Messages are newline-delimited JSON. Requests flow supervisor → worker on
//! the worker's stdin; responses and forwarded log records flow back on its
//! stdout as a tagged union discriminated by the `type` field.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppMode;

// ============================================================================
// Operation identifiers and failure codes
// ============================================================================

/// Operation identifiers understood by the worker.
pub mod operations {
    pub const RUN_MIGRATIONS: &str = "run-migrations";
    pub const GENERATE_SCHEMA: &str = "generate-schema";
}

/// Failure codes carried in failed responses.
pub mod codes {
    pub const OPERATION_FAILED: &str = "OPERATION_FAILED";
    pub const UNSUPPORTED_OPERATION: &str = "UNSUPPORTED_OPERATION";
    pub const MALFORMED_REQUEST: &str = "MALFORMED_REQUEST";
}

/// Failure reason reported for an operation outside the dispatch table.
pub const UNSUPPORTED_OPERATION_REASON: &str = "unsupported operation";

// ============================================================================
// Request
// ============================================================================

/// Environment values the worker needs to interpret a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub mode: AppMode,
    pub session_id: String,
}

/// Request sent to the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    /// Correlation token, unique per call.
    pub id: String,
    /// Operation identifier (e.g. "run-migrations").
    pub kind: String,
    /// Informational timestamp.
    #[serde(default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub context: RequestContext,
    /// Operation-specific parameters.
    #[serde(default)]
    pub params: Value,
}

// ============================================================================
// Worker → supervisor messages
// ============================================================================

/// Every message the worker writes to its stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    Response(OperationResponse),
    Log(LogRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// Terminal response to a single request.
///
/// `id` and `kind` are optional only because a malformed request may not
/// carry them; the worker echoes whatever it could recover.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    pub id: Option<String>,
    pub kind: Option<String>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

impl OperationResponse {
    pub fn success(id: impl Into<String>, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Some(id.into()),
            kind: Some(kind.into()),
            outcome: Outcome::Success,
            payload: Some(payload),
            failure: None,
        }
    }

    pub fn failure(id: Option<String>, kind: Option<String>, failure: FailureInfo) -> Self {
        Self {
            id,
            kind,
            outcome: Outcome::Failure,
            payload: None,
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Error information in a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
    pub code: String,
    pub reason: String,
    /// Diagnostic trace (the error's cause chain).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl FailureInfo {
    pub fn new(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: Option<String>) -> Self {
        self.trace = trace;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    #[serde(other)]
    Unknown,
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::TRACE => LogLevel::Trace,
        }
    }
}

/// Log event forwarded from the worker. Never settles a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    #[serde(default)]
    pub data: Vec<Value>,
}

impl LogRecord {
    /// Render `data` as one line: strings verbatim, everything else as JSON.
    pub fn render(&self) -> String {
        self.data
            .iter()
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ============================================================================
// Operation parameters and results
// ============================================================================

/// Parameters for `run-migrations`. Both paths override the worker's config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMigrationsParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrations_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

/// Result of `run-migrations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMigrationsResult {
    pub migrations_path: PathBuf,
    /// Files applied by this run, in order.
    #[serde(default)]
    pub applied: Vec<String>,
}

/// Informational result of `generate-schema`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateSchemaResult {
    pub message: String,
    /// Declared schema rendered as SQLite DDL.
    pub ddl: String,
    /// Tables currently present in the storage file.
    pub tables: Vec<String>,
}

/// Serialize a message as a single NDJSON line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
