//! Bridge error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors surfaced to callers of `open`, `call` and the typed helpers.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The worker process could not be started.
    #[error("failed to spawn worker process: {0}")]
    Spawn(#[source] io::Error),

    /// A call for this operation is already in flight.
    #[error("operation {0} is already in flight")]
    DuplicateCall(String),

    /// The worker executed the operation and reported failure.
    #[error("operation failed: {reason}")]
    Operation {
        reason: String,
        trace: Option<String>,
    },

    /// No response arrived within the call's timeout.
    #[error("operation {kind} timed out after {}ms", .timeout.as_millis())]
    Timeout { kind: String, timeout: Duration },

    /// The transport broke (worker exited, stdout closed, stdin write failed).
    #[error("worker channel error: {0}")]
    Channel(String),

    /// The worker could not parse the request.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("failed to serialize request: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to decode operation payload: {0}")]
    Deserialize(#[source] serde_json::Error),
}

impl BridgeError {
    pub fn operation(reason: impl Into<String>, trace: Option<String>) -> Self {
        Self::Operation {
            reason: reason.into(),
            trace,
        }
    }

    pub fn channel(reason: impl Into<String>) -> Self {
        Self::Channel(reason.into())
    }

    /// Check if this error indicates the worker is gone.
    pub fn is_channel_error(&self) -> bool {
        matches!(self, Self::Channel(_))
    }

    /// The worker-reported reason, for `Operation` and `MalformedMessage`.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Operation { reason, .. } | Self::MalformedMessage(reason) => Some(reason),
            _ => None,
        }
    }
}
