//! Forward worker `tracing` output to the supervisor as log messages.

use std::io;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::Metadata;
use tracing_subscriber::fmt::MakeWriter;

use crate::bridge::protocol::{LogLevel, LogRecord, WorkerMessage};

/// [`MakeWriter`] that turns each formatted event into a `log` message.
///
/// Messages go through the same outbound queue as responses, so a log
/// emitted during an operation is always written before that operation's
/// response.
#[derive(Debug, Clone)]
pub struct ForwardMakeWriter {
    tx: UnboundedSender<WorkerMessage>,
}

impl ForwardMakeWriter {
    pub fn new(tx: UnboundedSender<WorkerMessage>) -> Self {
        Self { tx }
    }
}

impl<'a> MakeWriter<'a> for ForwardMakeWriter {
    type Writer = ForwardWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ForwardWriter::new(self.tx.clone(), LogLevel::Info)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        ForwardWriter::new(self.tx.clone(), LogLevel::from(meta.level()))
    }
}

/// Buffers one formatted event and sends it when dropped.
pub struct ForwardWriter {
    tx: UnboundedSender<WorkerMessage>,
    level: LogLevel,
    buf: Vec<u8>,
}

impl ForwardWriter {
    fn new(tx: UnboundedSender<WorkerMessage>, level: LogLevel) -> Self {
        Self {
            tx,
            level,
            buf: Vec::new(),
        }
    }
}

impl io::Write for ForwardWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ForwardWriter {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buf);
        let text = text.trim_end();
        if text.is_empty() {
            return;
        }
        // A closed queue means the worker is shutting down
        let _ = self.tx.send(WorkerMessage::Log(LogRecord {
            level: self.level,
            data: vec![Value::String(text.to_string())],
        }));
    }
}
