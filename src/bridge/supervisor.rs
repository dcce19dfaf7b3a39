//! Async supervisor for the hourglass worker process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::environment::{WorkerEnvironment, SUPERVISED_FLAG};
use super::error::{BridgeError, BridgeResult};
use super::protocol::{
    codes, encode_line, operations, FailureInfo, GenerateSchemaResult, LogLevel, LogRecord,
    OperationRequest, OperationResponse, Outcome, RequestContext, RunMigrationsParams,
    RunMigrationsResult, WorkerMessage,
};

/// Default per-call timeout (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time `close()` waits for the worker to exit on its own.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// File name of the worker binary.
pub const WORKER_BINARY: &str = "hourglass-worker";

/// `tracing` target for log records forwarded from the worker.
pub const WORKER_LOG_TARGET: &str = "hourglass::worker";

/// Lifecycle of the worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Spawning,
    Running,
    Exited,
}

/// How to start the worker.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub context: RequestContext,
    pub timeout: Duration,
    pub shutdown_grace: Duration,
}

impl BridgeOptions {
    /// Options for a supervised worker at `program` with the given environment.
    pub fn new(program: impl Into<PathBuf>, environment: &WorkerEnvironment) -> Self {
        Self {
            program: program.into(),
            args: vec![SUPERVISED_FLAG.to_string()],
            env: environment.vars(),
            context: environment.context(),
            timeout: DEFAULT_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// Settlement delivered to a waiting caller.
#[derive(Debug)]
enum Settlement {
    Response(OperationResponse),
    ChannelClosed(String),
}

/// Pending Call Record. Keyed by operation kind in [`Shared::pending`].
struct PendingCall {
    id: String,
    tx: oneshot::Sender<Settlement>,
}

/// State shared between callers, the reader task and the monitor task.
struct Shared {
    pending: HashMap<String, PendingCall>,
    state: WorkerState,
}

impl Shared {
    fn new(state: WorkerState) -> Self {
        Self {
            pending: HashMap::new(),
            state,
        }
    }

    /// Mark the worker gone and fail every pending call.
    fn fail_all(&mut self, reason: &str) {
        self.state = WorkerState::Exited;
        for (kind, call) in self.pending.drain() {
            debug!(kind = %kind, id = %call.id, reason, "failing pending call");
            let _ = call.tx.send(Settlement::ChannelClosed(reason.to_string()));
        }
    }
}

struct Monitor {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Supervisor for a worker process.
///
/// The worker is spawned as a child process and spoken to over NDJSON on
/// stdin/stdout. A single reader task demultiplexes everything the worker
/// writes: log records are re-emitted through `tracing`, responses settle the
/// pending call for their operation kind. At most one call per kind may be in
/// flight; different kinds run concurrently.
///
/// # Example
///
/// ```ignore
/// use hourglass::bridge::{BridgeOptions, Supervisor, WorkerEnvironment};
///
/// let env = WorkerEnvironment::new(mode, session_id);
/// let bridge = Supervisor::open(BridgeOptions::new("./hourglass-worker", &env)).await?;
/// let result = bridge.run_migrations(Default::default()).await?;
/// bridge.close().await;
/// ```
pub struct Supervisor {
    writer: Mutex<Option<BufWriter<BoxedWriter>>>,
    shared: Arc<Mutex<Shared>>,
    context: RequestContext,
    timeout: Duration,
    closed: AtomicBool,
    pid: Option<u32>,
    reader_task: JoinHandle<()>,
    monitor: Mutex<Option<Monitor>>,
}

impl Supervisor {
    /// Spawn the worker and start supervising it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Spawn`] if the process cannot be started.
    pub async fn open(options: BridgeOptions) -> BridgeResult<Self> {
        let shared = Arc::new(Mutex::new(Shared::new(WorkerState::Spawning)));

        debug!(program = %options.program.display(), args = ?options.args, "spawning worker");
        let mut child = Command::new(&options.program)
            .args(&options.args)
            .envs(options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!(program = %options.program.display(), error = %e, "failed to spawn worker");
                BridgeError::Spawn(e)
            })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill().await;
                return Err(BridgeError::Spawn(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "worker stdio was not captured",
                )));
            }
        };

        let pid = child.id();
        shared.lock().await.state = WorkerState::Running;
        info!(pid = ?pid, program = %options.program.display(), "worker spawned");

        let reader_task = spawn_reader_task(stdout, shared.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(monitor_child(
            child,
            pid,
            shutdown_rx,
            options.shutdown_grace,
            shared.clone(),
        ));

        Ok(Self {
            writer: Mutex::new(Some(BufWriter::new(Box::new(stdin) as BoxedWriter))),
            shared,
            context: options.context,
            timeout: options.timeout,
            closed: AtomicBool::new(false),
            pid,
            reader_task,
            monitor: Mutex::new(Some(Monitor {
                shutdown: shutdown_tx,
                handle,
            })),
        })
    }

    /// Supervise an already-connected transport instead of a child process.
    ///
    /// Used to drive the supervisor against an in-process fake worker.
    pub fn with_transport<R, W>(
        reader: R,
        writer: W,
        context: RequestContext,
        timeout: Duration,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Mutex::new(Shared::new(WorkerState::Running)));
        let reader_task = spawn_reader_task(reader, shared.clone());

        Self {
            writer: Mutex::new(Some(BufWriter::new(Box::new(writer) as BoxedWriter))),
            shared,
            context,
            timeout,
            closed: AtomicBool::new(false),
            pid: None,
            reader_task,
            monitor: Mutex::new(None),
        }
    }

    /// Send an operation and wait for its result using the default timeout.
    pub async fn call(&self, kind: &str, params: Value) -> BridgeResult<Value> {
        self.call_with_timeout(kind, params, self.timeout).await
    }

    /// Send an operation and wait at most `timeout` for its result.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::DuplicateCall`] if a call for `kind` is already in flight
    /// - [`BridgeError::Operation`] if the worker reports failure
    /// - [`BridgeError::MalformedMessage`] if the worker could not parse the request
    /// - [`BridgeError::Timeout`] if no response arrives in time
    /// - [`BridgeError::Channel`] if the worker is gone or the write fails
    pub async fn call_with_timeout(
        &self,
        kind: &str,
        params: Value,
        timeout: Duration,
    ) -> BridgeResult<Value> {
        let response = self.call_raw(kind, params, timeout).await?;
        into_result(response)
    }

    async fn call_raw(
        &self,
        kind: &str,
        params: Value,
        timeout: Duration,
    ) -> BridgeResult<OperationResponse> {
        let id = Uuid::new_v4().to_string();
        let request = OperationRequest {
            id: id.clone(),
            kind: kind.to_string(),
            issued_at: Utc::now(),
            context: self.context.clone(),
            params,
        };
        let line = encode_line(&request).map_err(BridgeError::Serialize)?;

        // Register the pending call before writing so a fast response finds it
        let (tx, rx) = oneshot::channel();
        {
            let mut shared = self.shared.lock().await;
            if shared.state == WorkerState::Exited {
                return Err(BridgeError::channel("worker has exited"));
            }
            if shared.pending.contains_key(kind) {
                return Err(BridgeError::DuplicateCall(kind.to_string()));
            }
            shared.pending.insert(
                kind.to_string(),
                PendingCall {
                    id: id.clone(),
                    tx,
                },
            );
        }

        if let Err(e) = self.write_line(&line).await {
            self.remove_pending(kind, &id).await;
            return Err(e);
        }
        debug!(kind, id = %id, "sent operation request");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Settlement::Response(response))) => Ok(response),
            Ok(Ok(Settlement::ChannelClosed(reason))) => Err(BridgeError::Channel(reason)),
            Ok(Err(_)) => Err(BridgeError::channel("pending call was dropped")),
            Err(_) => {
                self.remove_pending(kind, &id).await;
                warn!(kind, id = %id, timeout_ms = timeout.as_millis() as u64, "operation timed out");
                Err(BridgeError::Timeout {
                    kind: kind.to_string(),
                    timeout,
                })
            }
        }
    }

    async fn write_line(&self, line: &str) -> BridgeResult<()> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(BridgeError::channel("bridge is closed"));
        };
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| BridgeError::channel(format!("failed to write to worker: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| BridgeError::channel(format!("failed to write to worker: {e}")))
    }

    /// Remove the record for `kind` only if it still belongs to call `id`.
    async fn remove_pending(&self, kind: &str, id: &str) {
        let mut shared = self.shared.lock().await;
        if shared.pending.get(kind).is_some_and(|call| call.id == id) {
            shared.pending.remove(kind);
        }
    }

    /// Terminate the worker.
    ///
    /// Closes stdin (the graceful termination request), waits up to the
    /// shutdown grace period, then kills the process if it is still alive.
    /// Kill failures are logged, never returned. Calling this twice is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("bridge already closed");
            return;
        }
        info!(pid = ?self.pid, "closing worker bridge");

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "worker stdin already closed");
            }
        }

        let monitor = self.monitor.lock().await.take();
        if let Some(Monitor { shutdown, handle }) = monitor {
            let _ = shutdown.send(());
            if let Err(e) = handle.await {
                error!(error = %e, "worker monitor task failed");
            }
        }

        self.shared.lock().await.fail_all("bridge closed");
    }

    /// Current worker lifecycle state.
    pub async fn state(&self) -> WorkerState {
        self.shared.lock().await.state
    }

    /// OS process id of the worker, when supervising a real process.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

// Convenience methods for the supported operations
impl Supervisor {
    /// Apply pending migrations in the worker.
    pub async fn run_migrations(
        &self,
        params: RunMigrationsParams,
    ) -> BridgeResult<RunMigrationsResult> {
        let params = serde_json::to_value(params).map_err(BridgeError::Serialize)?;
        let payload = self.call(operations::RUN_MIGRATIONS, params).await?;
        serde_json::from_value(payload).map_err(BridgeError::Deserialize)
    }

    /// Ask the worker for the declared schema and the tables present on disk.
    pub async fn generate_schema(&self) -> BridgeResult<GenerateSchemaResult> {
        let payload = self
            .call(operations::GENERATE_SCHEMA, Value::Object(Default::default()))
            .await?;
        serde_json::from_value(payload).map_err(BridgeError::Deserialize)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // The monitor kills the child once its shutdown sender is dropped
        self.reader_task.abort();
    }
}

/// Spawn the task that reads every line the worker writes.
fn spawn_reader_task<R>(reader: R, shared: Arc<Mutex<Shared>>) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => route_line(&line, &shared).await,
                Ok(None) => {
                    debug!("worker stdout closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read from worker");
                    break;
                }
            }
        }

        shared.lock().await.fail_all("worker channel closed");
    })
}

async fn route_line(line: &str, shared: &Mutex<Shared>) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    match serde_json::from_str::<WorkerMessage>(line) {
        Ok(WorkerMessage::Log(record)) => forward_log(&record),
        Ok(WorkerMessage::Response(response)) => settle(response, shared).await,
        Err(e) => warn!(error = %e, line, "discarding unparseable worker message"),
    }
}

/// Settle the pending call matching both the response's kind and id.
async fn settle(response: OperationResponse, shared: &Mutex<Shared>) {
    let mut shared = shared.lock().await;

    let Some(kind) = response.kind.clone() else {
        warn!(id = ?response.id, "discarding response without an operation kind");
        return;
    };

    let matches = shared
        .pending
        .get(&kind)
        .is_some_and(|call| response.id.as_deref() == Some(call.id.as_str()));
    if !matches {
        warn!(kind = %kind, id = ?response.id, "discarding orphaned response");
        return;
    }

    if let Some(call) = shared.pending.remove(&kind) {
        trace!(kind = %kind, id = %call.id, "settling call");
        let _ = call.tx.send(Settlement::Response(response));
    }
}

fn forward_log(record: &LogRecord) {
    let message = record.render();
    match record.level {
        LogLevel::Error => error!(target: WORKER_LOG_TARGET, "{message}"),
        LogLevel::Warn => warn!(target: WORKER_LOG_TARGET, "{message}"),
        LogLevel::Info | LogLevel::Unknown => info!(target: WORKER_LOG_TARGET, "{message}"),
        LogLevel::Debug => debug!(target: WORKER_LOG_TARGET, "{message}"),
        LogLevel::Trace => trace!(target: WORKER_LOG_TARGET, "{message}"),
    }
}

/// Own the child process until it exits or `close()` asks it to.
async fn monitor_child(
    mut child: Child,
    pid: Option<u32>,
    shutdown: oneshot::Receiver<()>,
    grace: Duration,
    shared: Arc<Mutex<Shared>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = shutdown => {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!(pid = ?pid, grace_ms = grace.as_millis() as u64, "worker did not exit in time, killing");
                    if let Err(e) = child.kill().await {
                        error!(pid = ?pid, error = %e, "failed to kill worker");
                    }
                    child.wait().await
                }
            }
        }
    };

    match status {
        Ok(status) => match status.code() {
            Some(0) => info!(pid = ?pid, "worker exited cleanly"),
            Some(code) => warn!(pid = ?pid, code, "worker exited with nonzero status"),
            None => warn!(pid = ?pid, %status, "worker terminated by signal"),
        },
        Err(e) => error!(pid = ?pid, error = %e, "failed to wait for worker"),
    }

    shared.lock().await.fail_all("worker process exited");
}

pub(crate) fn into_result(response: OperationResponse) -> BridgeResult<Value> {
    match response.outcome {
        Outcome::Success => Ok(response.payload.unwrap_or(Value::Null)),
        Outcome::Failure => {
            let failure = response.failure.unwrap_or_else(|| {
                FailureInfo::new(codes::OPERATION_FAILED, "worker reported failure without details")
            });
            Err(classify_failure(failure))
        }
    }
}

/// Map a worker failure to a bridge error kind.
fn classify_failure(failure: FailureInfo) -> BridgeError {
    match failure.code.as_str() {
        codes::MALFORMED_REQUEST => BridgeError::MalformedMessage(failure.reason),
        _ => BridgeError::operation(failure.reason, failure.trace),
    }
}

/// Resolve the worker binary path.
///
/// Searches in order: the configured path, a sibling of the current
/// executable, well-known build locations, then `PATH`.
pub fn resolve_worker_path(configured: Option<PathBuf>) -> BridgeResult<PathBuf> {
    if let Some(path) = configured {
        return Ok(path);
    }

    let binary = format!("{WORKER_BINARY}{}", std::env::consts::EXE_SUFFIX);

    if let Some(dir) = crate::config::paths::exe_dir() {
        let sibling = dir.join(&binary);
        if sibling.is_file() {
            return Ok(sibling);
        }
        // Test binaries live one level down, in target/<profile>/deps
        if let Some(parent) = dir.parent() {
            let sibling = parent.join(&binary);
            if sibling.is_file() {
                return Ok(sibling);
            }
        }
    }

    let candidates = [
        PathBuf::from(".").join(&binary),
        Path::new("target").join("debug").join(&binary),
        Path::new("target").join("release").join(&binary),
    ];
    if let Some(found) = candidates.into_iter().find(|p| p.is_file()) {
        return Ok(found);
    }

    if let Some(path_var) = std::env::var_os("PATH") {
        if let Some(found) = std::env::split_paths(&path_var)
            .map(|dir| dir.join(&binary))
            .find(|p| p.is_file())
        {
            return Ok(found);
        }
    }

    Err(BridgeError::Spawn(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "worker binary not found. Set worker.path in config or build hourglass-worker",
    )))
}
