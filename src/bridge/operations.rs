//! The storage-operation seam used by application startup.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::worker::Dispatcher;

use super::error::{BridgeError, BridgeResult};
use super::protocol::{
    operations, GenerateSchemaResult, OperationRequest, RequestContext, RunMigrationsParams,
    RunMigrationsResult,
};
use super::supervisor::{into_result, Supervisor};

/// Operations that must run with exclusive access to the storage file.
///
/// Implemented by the supervised [`Supervisor`] and by the in-process
/// [`DirectOperations`]. Both report failures with the same error kinds.
#[async_trait]
pub trait DbOperations: Send + Sync {
    async fn run_migrations(&self, params: RunMigrationsParams) -> BridgeResult<RunMigrationsResult>;

    async fn generate_schema(&self) -> BridgeResult<GenerateSchemaResult>;

    /// Release whatever the implementation holds (the worker process).
    async fn shutdown(&self);
}

#[async_trait]
impl DbOperations for Supervisor {
    async fn run_migrations(&self, params: RunMigrationsParams) -> BridgeResult<RunMigrationsResult> {
        Supervisor::run_migrations(self, params).await
    }

    async fn generate_schema(&self) -> BridgeResult<GenerateSchemaResult> {
        Supervisor::generate_schema(self).await
    }

    async fn shutdown(&self) {
        self.close().await;
    }
}

/// Runs operations in this process, without a worker.
///
/// Requests still go through [`Dispatcher::dispatch`], so results and
/// failures have exactly the shape the supervised path produces.
#[derive(Debug, Clone)]
pub struct DirectOperations {
    dispatcher: Arc<Dispatcher>,
    context: RequestContext,
}

impl DirectOperations {
    pub fn new(dispatcher: Dispatcher) -> Self {
        let config = dispatcher.config();
        let context = RequestContext {
            mode: config.mode,
            session_id: config.session_id.clone(),
        };
        Self {
            dispatcher: Arc::new(dispatcher),
            context,
        }
    }

    async fn execute<T: DeserializeOwned>(&self, kind: &str, params: Value) -> BridgeResult<T> {
        let request = OperationRequest {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            issued_at: Utc::now(),
            context: self.context.clone(),
            params,
        };
        let dispatcher = self.dispatcher.clone();

        let response = tokio::task::spawn_blocking(move || dispatcher.dispatch(&request))
            .await
            .map_err(|e| BridgeError::operation(format!("operation aborted: {e}"), None))?;
        let payload = into_result(response)?;
        serde_json::from_value(payload).map_err(BridgeError::Deserialize)
    }
}

#[async_trait]
impl DbOperations for DirectOperations {
    async fn run_migrations(&self, params: RunMigrationsParams) -> BridgeResult<RunMigrationsResult> {
        let params = serde_json::to_value(params).map_err(BridgeError::Serialize)?;
        self.execute(operations::RUN_MIGRATIONS, params).await
    }

    async fn generate_schema(&self) -> BridgeResult<GenerateSchemaResult> {
        self.execute(operations::GENERATE_SCHEMA, Value::Null).await
    }

    async fn shutdown(&self) {}
}
