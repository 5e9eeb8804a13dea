use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::export::{ExportError, schema::RowSchema};

/// One batch of rows for a write stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendRowsRequest {
    pub write_stream: String,
    /// Identifies this producer in the sink's logs.
    pub trace_id: String,
    pub writer_schema: RowSchema,
    pub rows: Vec<serde_json::Value>,
}

/// Acknowledgement for one batch. `error` is set when the sink refused it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendRowsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AppendRowsResponse {
    pub fn accepted(row_count: usize) -> Self {
        Self {
            row_count: Some(row_count),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            row_count: None,
            error: Some(error.into()),
        }
    }
}

/// Analytics destination for exported rounds.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Resolve a destination identifier to a write stream name.
    async fn create_write_stream(&self, destination: &str) -> Result<String, ExportError>;

    /// Open a batch-append session.
    async fn append_rows(&self) -> Result<Box<dyn AppendStream>, ExportError>;
}

#[async_trait]
pub trait AppendStream: Send {
    async fn send(&mut self, request: AppendRowsRequest) -> Result<(), ExportError>;

    async fn recv(&mut self) -> Result<AppendRowsResponse, ExportError>;
}
