//! In-process sink that keeps every batch it receives.
//!
//! Used by tests and by embedders that want to inspect exported rows without
//! running a sink server. Failure modes can be toggled at runtime.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;

use crate::export::{
    ExportError,
    sink::{AppendRowsRequest, AppendRowsResponse, AppendStream, Sink},
};

#[derive(Default)]
struct MemoryState {
    write_streams: Vec<String>,
    batches: Vec<AppendRowsRequest>,
    reject: Option<String>,
    fail_open: bool,
    ack_delay: Duration,
}

#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    /// Batches received so far, oldest first.
    pub fn batches(&self) -> Vec<AppendRowsRequest> {
        self.lock().batches.clone()
    }

    pub fn write_streams(&self) -> Vec<String> {
        self.lock().write_streams.clone()
    }

    /// Acknowledge every following batch with a sink-side error.
    pub fn reject_with(&self, error: impl Into<String>) {
        self.lock().reject = Some(error.into());
    }

    /// Make opening an append stream fail.
    pub fn fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    /// Hold every acknowledgement back for `delay`.
    pub fn delay_acks(&self, delay: Duration) {
        self.lock().ack_delay = delay;
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn create_write_stream(&self, destination: &str) -> Result<String, ExportError> {
        let mut state = self.lock();
        let name = format!("{}/streams/{}", destination, state.write_streams.len());
        state.write_streams.push(name.clone());
        Ok(name)
    }

    async fn append_rows(&self) -> Result<Box<dyn AppendStream>, ExportError> {
        if self.lock().fail_open {
            return Err(ExportError::Connect(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "memory sink is refusing streams",
            )));
        }
        Ok(Box::new(MemoryStream {
            sink: self.clone(),
            pending: None,
        }))
    }
}

struct MemoryStream {
    sink: MemorySink,
    pending: Option<usize>,
}

#[async_trait]
impl AppendStream for MemoryStream {
    async fn send(&mut self, request: AppendRowsRequest) -> Result<(), ExportError> {
        self.pending = Some(request.rows.len());
        self.sink.lock().batches.push(request);
        Ok(())
    }

    async fn recv(&mut self) -> Result<AppendRowsResponse, ExportError> {
        let rows = self.pending.take().ok_or(ExportError::Closed)?;
        let (delay, reject) = {
            let state = self.sink.lock();
            (state.ack_delay, state.reject.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(match reject {
            Some(err) => AppendRowsResponse::rejected(err),
            None => AppendRowsResponse::accepted(rows),
        })
    }
}
