//! Operation dispatch.
//!
//! The dispatch table is closed: anything outside [`Operation`] is answered
//! with an "unsupported operation" failure. Every supported operation opens
//! its own storage connection and closes it before the response is built.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, info_span, warn};

use crate::bridge::protocol::{
    codes, operations, FailureInfo, GenerateSchemaResult, OperationRequest, OperationResponse,
    RunMigrationsParams, RunMigrationsResult, UNSUPPORTED_OPERATION_REASON,
};
use crate::config::resolve_migrations_dir;
use crate::db::{migrate, schema, Storage};

use super::config::WorkerConfig;
use super::error::{error_trace, WorkerError, WorkerResult};

/// Operations the worker can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    RunMigrations,
    GenerateSchema,
}

impl Operation {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            operations::RUN_MIGRATIONS => Some(Operation::RunMigrations),
            operations::GENERATE_SCHEMA => Some(Operation::GenerateSchema),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::RunMigrations => operations::RUN_MIGRATIONS,
            Operation::GenerateSchema => operations::GENERATE_SCHEMA,
        }
    }
}

/// Parse one request line.
///
/// A line that is not a JSON object, or lacks `kind`, yields the failure
/// response to send back instead. Whatever `id`/`kind` could be recovered is
/// echoed.
pub fn parse_request(line: &str) -> Result<OperationRequest, OperationResponse> {
    let malformed = |id: Option<String>, kind: Option<String>, reason: String| {
        warn!(id = ?id, kind = ?kind, reason = %reason, "malformed request");
        OperationResponse::failure(
            id,
            kind,
            FailureInfo::new(codes::MALFORMED_REQUEST, reason),
        )
    };

    let value: Value = serde_json::from_str(line)
        .map_err(|e| malformed(None, None, format!("invalid message format: {e}")))?;

    let Some(object) = value.as_object() else {
        return Err(malformed(
            None,
            None,
            "invalid message format: expected a JSON object".to_string(),
        ));
    };

    let id = object.get("id").and_then(Value::as_str).map(str::to_string);
    let kind = object.get("kind").and_then(Value::as_str).map(str::to_string);
    if kind.is_none() {
        return Err(malformed(
            id,
            None,
            "invalid message format: missing kind".to_string(),
        ));
    }

    serde_json::from_value::<OperationRequest>(value)
        .map_err(|e| malformed(id, kind, format!("invalid message format: {e}")))
}

/// Executes operations against the configured storage.
///
/// Holds no state between requests beyond its configuration. Used by the
/// supervised runtime and, directly, by standalone mode.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: WorkerConfig,
}

impl Dispatcher {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Execute one request and build its single terminal response.
    pub fn dispatch(&self, request: &OperationRequest) -> OperationResponse {
        let span = info_span!("operation", kind = %request.kind, id = %request.id);
        let _enter = span.enter();

        let Some(operation) = Operation::parse(&request.kind) else {
            warn!("unsupported operation");
            return OperationResponse::failure(
                Some(request.id.clone()),
                Some(request.kind.clone()),
                FailureInfo::new(codes::UNSUPPORTED_OPERATION, UNSUPPORTED_OPERATION_REASON),
            );
        };

        info!("executing operation");
        let result = match operation {
            Operation::RunMigrations => {
                parse_params::<RunMigrationsParams>(operation, &request.params)
                    .and_then(|params| self.run_migrations(params))
                    .and_then(|result| to_payload(&result))
            }
            Operation::GenerateSchema => self
                .generate_schema()
                .and_then(|result| to_payload(&result)),
        };

        match result {
            Ok(payload) => {
                info!("operation succeeded");
                OperationResponse::success(request.id.clone(), request.kind.clone(), payload)
            }
            Err(e) => {
                error!(error = %e, "operation failed");
                OperationResponse::failure(
                    Some(request.id.clone()),
                    Some(request.kind.clone()),
                    FailureInfo::new(codes::OPERATION_FAILED, e.to_string())
                        .with_trace(error_trace(&e)),
                )
            }
        }
    }

    /// Apply pending migrations.
    ///
    /// The connection is released on every path; a migration error wins over
    /// an error raised while closing.
    pub fn run_migrations(&self, params: RunMigrationsParams) -> WorkerResult<RunMigrationsResult> {
        let migrations_path = match params.migrations_path {
            Some(path) => path,
            None => resolve_migrations_dir(self.config.mode, self.config.migrations_path.clone())?,
        };
        let database_path = params
            .database_path
            .unwrap_or_else(|| self.config.database_path.clone());

        info!(
            migrations = %migrations_path.display(),
            database = %database_path.display(),
            "running migrations"
        );

        let mut storage = Storage::open(&database_path, self.config.busy_timeout)?;
        let outcome = migrate::apply_migrations(storage.connection_mut(), &migrations_path);
        let closed = storage.close();

        let applied = outcome?;
        closed?;

        info!(count = applied.len(), "migrations complete");
        Ok(RunMigrationsResult {
            migrations_path,
            applied,
        })
    }

    /// Report the declared schema and the tables present in storage.
    ///
    /// Artifact generation itself belongs to an external schema compiler.
    pub fn generate_schema(&self) -> WorkerResult<GenerateSchemaResult> {
        let storage = Storage::open(&self.config.database_path, self.config.busy_timeout)?;
        let tables = schema::list_tables(storage.connection());
        let closed = storage.close();

        let tables = tables?;
        closed?;

        Ok(GenerateSchemaResult {
            message: "schema is declared in code; run the schema compiler to emit artifacts"
                .to_string(),
            ddl: schema::declared_schema_sql(),
            tables,
        })
    }

    pub fn database_path(&self) -> &Path {
        &self.config.database_path
    }
}

fn parse_params<T>(operation: Operation, params: &Value) -> WorkerResult<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone()).map_err(|source| WorkerError::InvalidParams {
        kind: operation.as_str().to_string(),
        source,
    })
}

fn to_payload<T: Serialize>(result: &T) -> WorkerResult<Value> {
    serde_json::to_value(result).map_err(WorkerError::Encode)
}
