//! Forwarding of completed rounds to the analytics sink.
//!
//! A round becomes one `AppendRowsRequest`: every probe result is a row, all
//! rows share the round timestamp, and the batch is tagged with the
//! configured trace identifier. Sending is two-phase: open an append stream,
//! write the batch, then read exactly one acknowledgement. Nothing here
//! retries; the caller decides what a failure means.

use std::sync::Arc;

use healthprobe_common::{Round, Target};
use log::{debug, info};
use thiserror::Error;

pub mod memory;
pub mod schema;
pub mod sink;
pub mod tcp;

pub use memory::MemorySink;
pub use schema::RowSchema;
pub use sink::{AppendRowsRequest, AppendRowsResponse, AppendStream, Sink};
pub use tcp::TcpSink;

/// Tags export batches when no trace identifier is configured.
pub const DEFAULT_TRACE_ID: &str = "healthprobe";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to connect to sink: {0}")]
    Connect(#[source] std::io::Error),
    #[error("failed to serialize rows: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("error sending batch: {0}")]
    Send(#[source] std::io::Error),
    #[error("error reading acknowledgement: {0}")]
    Recv(#[source] std::io::Error),
    #[error("sink closed the stream before acknowledging")]
    Closed,
    #[error("sink timed out")]
    Timeout,
    #[error("sink rejected batch: {0}")]
    Rejected(String),
    #[error("unexpected sink response: {0}")]
    Protocol(String),
}

pub struct Exporter {
    sink: Arc<dyn Sink>,
    write_stream: String,
    trace_id: String,
    schema: RowSchema,
    targets: Vec<Target>,
}

impl Exporter {
    /// Create the write stream for `destination` and return an exporter bound to it.
    pub async fn connect(
        sink: Arc<dyn Sink>,
        destination: &str,
        trace_id: impl Into<String>,
        targets: Vec<Target>,
    ) -> Result<Self, ExportError> {
        let write_stream = sink.create_write_stream(destination).await?;
        info!("Export write stream: {}", write_stream);
        Ok(Self {
            sink,
            write_stream,
            trace_id: trace_id.into(),
            schema: RowSchema::health_check(),
            targets,
        })
    }

    pub fn write_stream(&self) -> &str {
        &self.write_stream
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Build the batch for one round.
    pub fn batch(&self, round: &Round) -> Result<AppendRowsRequest, ExportError> {
        let rows = round
            .rows(&self.targets)
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AppendRowsRequest {
            write_stream: self.write_stream.clone(),
            trace_id: self.trace_id.clone(),
            writer_schema: self.schema.clone(),
            rows,
        })
    }

    /// Send one round as a single acknowledged batch. Returns the row count.
    pub async fn export(&self, round: &Round) -> Result<usize, ExportError> {
        let request = self.batch(round)?;
        let sent = request.rows.len();

        let mut stream = self.sink.append_rows().await?;
        stream.send(request).await?;
        let ack = stream.recv().await?;

        if let Some(err) = ack.error {
            return Err(ExportError::Rejected(err));
        }
        if let Some(acked) = ack.row_count
            && acked != sent
        {
            return Err(ExportError::Protocol(format!(
                "acknowledged {} of {} rows",
                acked, sent
            )));
        }

        debug!("batch for round {} acknowledged", round.timestamp);
        Ok(sent)
    }
}
