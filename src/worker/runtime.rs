//! Supervised worker loop.
//!
//! Reads one request per line from the input, executes requests strictly one
//! at a time in arrival order, and writes every outbound message (responses
//! and forwarded logs) through a single ordered queue.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::bridge::protocol::{
    codes, encode_line, FailureInfo, OperationRequest, OperationResponse, WorkerMessage,
};

use super::dispatch::{parse_request, Dispatcher};

/// Serve requests until `input` reaches EOF.
///
/// `outbox`/`inbox` are the two ends of the outbound queue. The caller keeps
/// clones of `outbox` (e.g. for log forwarding) so the queue is drained
/// explicitly on shutdown rather than by waiting for every sender to drop.
pub async fn serve<R, W>(
    dispatcher: Arc<Dispatcher>,
    input: R,
    output: W,
    outbox: UnboundedSender<WorkerMessage>,
    inbox: UnboundedReceiver<WorkerMessage>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (stop_tx, stop_rx) = oneshot::channel();
    let writer = tokio::spawn(write_messages(output, inbox, stop_rx));

    info!(
        mode = %dispatcher.config().mode,
        session = %dispatcher.config().session_id,
        "worker ready"
    );

    let mut lines = BufReader::new(input).lines();
    let read_result = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => {
                error!(error = %e, "failed to read request");
                break Err(e);
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match parse_request(&line) {
            Ok(request) => execute(dispatcher.clone(), request).await,
            Err(response) => response,
        };
        if outbox.send(WorkerMessage::Response(response)).is_err() {
            break Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "outbound queue closed",
            ));
        }
    };

    info!("input closed, worker shutting down");
    let _ = stop_tx.send(());
    let write_result = writer.await.map_err(io::Error::other)?;

    read_result.and(write_result)
}

/// Run one request on the blocking pool.
async fn execute(dispatcher: Arc<Dispatcher>, request: OperationRequest) -> OperationResponse {
    let id = request.id.clone();
    let kind = request.kind.clone();

    match tokio::task::spawn_blocking(move || dispatcher.dispatch(&request)).await {
        Ok(response) => response,
        Err(e) => {
            error!(kind = %kind, id = %id, error = %e, "operation task failed");
            OperationResponse::failure(
                Some(id),
                Some(kind),
                FailureInfo::new(codes::OPERATION_FAILED, format!("operation aborted: {e}")),
            )
        }
    }
}

/// Drain the outbound queue into `output` until told to stop.
///
/// On stop, whatever is already queued is still written.
async fn write_messages<W>(
    output: W,
    mut inbox: UnboundedReceiver<WorkerMessage>,
    mut stop: oneshot::Receiver<()>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut output = BufWriter::new(output);

    loop {
        tokio::select! {
            biased;
            message = inbox.recv() => match message {
                Some(message) => write_message(&mut output, &message).await?,
                None => break,
            },
            _ = &mut stop => {
                while let Ok(message) = inbox.try_recv() {
                    write_message(&mut output, &message).await?;
                }
                break;
            }
        }
    }

    output.flush().await?;
    output.shutdown().await
}

async fn write_message<W>(output: &mut BufWriter<W>, message: &WorkerMessage) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = match encode_line(message) {
        Ok(line) => line,
        Err(e) => {
            debug!(error = %e, "dropping message that failed to encode");
            return Ok(());
        }
    };
    output.write_all(line.as_bytes()).await?;
    output.flush().await
}
