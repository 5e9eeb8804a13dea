//! Newline-delimited JSON sink client.
//!
//! Every session is its own TCP connection. The client writes one request
//! line and reads one response line:
//!
//! ```text
//! -> {"op":"create_write_stream","destination":"network/health_check"}
//! <- {"name":"network/health_check/streams/7"}
//! -> {"op":"append_rows","write_stream":"...","trace_id":"...","writer_schema":{...},"rows":[...]}
//! <- {"row_count":5}            or  {"error":"..."}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::timeout,
};

use crate::export::{
    ExportError,
    sink::{AppendRowsRequest, AppendRowsResponse, AppendStream, Sink},
};

/// Bound on each connect, write and read against the sink.
const SINK_IO_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SinkRequest {
    CreateWriteStream { destination: String },
    AppendRows(AppendRowsRequest),
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CreateWriteStreamResponse {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

pub struct TcpSink {
    addr: String,
    io_timeout: Duration,
}

impl TcpSink {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            io_timeout: Duration::from_secs(SINK_IO_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    async fn open(&self) -> Result<Connection, ExportError> {
        let stream = timeout(self.io_timeout, TcpStream::connect(self.addr.as_str()))
            .await
            .map_err(|_| ExportError::Timeout)?
            .map_err(ExportError::Connect)?;
        debug!("connected to sink at {}", self.addr);
        let (read, write) = stream.into_split();
        Ok(Connection {
            reader: BufReader::new(read),
            writer: write,
            io_timeout: self.io_timeout,
        })
    }
}

#[async_trait]
impl Sink for TcpSink {
    async fn create_write_stream(&self, destination: &str) -> Result<String, ExportError> {
        let mut conn = self.open().await?;
        conn.write_message(&SinkRequest::CreateWriteStream {
            destination: destination.to_string(),
        })
        .await?;
        let line = conn.read_line().await?;
        let response: CreateWriteStreamResponse = serde_json::from_str(&line)?;

        match (response.name, response.error) {
            (_, Some(err)) => Err(ExportError::Rejected(err)),
            (Some(name), None) => Ok(name),
            (None, None) => Err(ExportError::Protocol(
                "create_write_stream response has neither name nor error".to_string(),
            )),
        }
    }

    async fn append_rows(&self) -> Result<Box<dyn AppendStream>, ExportError> {
        Ok(Box::new(self.open().await?))
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    io_timeout: Duration,
}

impl Connection {
    async fn write_message(&mut self, message: &SinkRequest) -> Result<(), ExportError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let write = async {
            self.writer.write_all(&line).await?;
            self.writer.flush().await
        };
        timeout(self.io_timeout, write)
            .await
            .map_err(|_| ExportError::Timeout)?
            .map_err(ExportError::Send)
    }

    async fn read_line(&mut self) -> Result<String, ExportError> {
        let mut line = String::new();
        let n = timeout(self.io_timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| ExportError::Timeout)?
            .map_err(ExportError::Recv)?;
        if n == 0 {
            return Err(ExportError::Closed);
        }
        Ok(line)
    }
}

#[async_trait]
impl AppendStream for Connection {
    async fn send(&mut self, request: AppendRowsRequest) -> Result<(), ExportError> {
        self.write_message(&SinkRequest::AppendRows(request)).await
    }

    async fn recv(&mut self) -> Result<AppendRowsResponse, ExportError> {
        let line = self.read_line().await?;
        Ok(serde_json::from_str(&line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{Exporter, RowSchema};
    use healthprobe_common::{ProbeResult, Round, Target, TargetKind};
    use std::sync::Arc;
    use tokio::{net::TcpListener, sync::mpsc};

    /// Minimal sink server: answers every request line, forwarding appends to `seen`.
    async fn spawn_sink_server(
        reject: Option<&'static str>,
    ) -> (String, mpsc::UnboundedReceiver<AppendRowsRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let (read, mut write) = socket.into_split();
                    let mut lines = BufReader::new(read).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let reply = match serde_json::from_str::<SinkRequest>(&line).unwrap() {
                            SinkRequest::CreateWriteStream { destination } => {
                                serde_json::json!({ "name": format!("{destination}/streams/0") })
                            }
                            SinkRequest::AppendRows(req) => {
                                let count = req.rows.len();
                                tx.send(req).unwrap();
                                match reject {
                                    Some(err) => serde_json::json!({ "error": err }),
                                    None => serde_json::json!({ "row_count": count }),
                                }
                            }
                        };
                        let mut out = serde_json::to_vec(&reply).unwrap();
                        out.push(b'\n');
                        write.write_all(&out).await.unwrap();
                    }
                });
            }
        });

        (addr, rx)
    }

    fn sample() -> (Vec<Target>, Round) {
        let targets = vec![
            Target::new("modem", TargetKind::Ping, "192.168.1.1"),
            Target::new("router", TargetKind::Ping, "192.168.88.1"),
        ];
        let round = Round {
            timestamp: 99,
            results: vec![
                ProbeResult::success("modem", Duration::from_millis(2)),
                ProbeResult::failure("router", "timeout"),
            ],
        };
        (targets, round)
    }

    #[tokio::test]
    async fn test_round_trip_through_tcp_sink() {
        let (addr, mut seen) = spawn_sink_server(None).await;
        let (targets, round) = sample();

        let exporter = Exporter::connect(Arc::new(TcpSink::new(addr)), "network/hc", "uplink", targets)
            .await
            .unwrap();
        assert_eq!(exporter.write_stream(), "network/hc/streams/0");

        assert_eq!(exporter.export(&round).await.unwrap(), 2);

        let batch = seen.recv().await.unwrap();
        assert_eq!(batch.trace_id, "uplink");
        assert_eq!(batch.writer_schema, RowSchema::health_check());
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.rows[1]["target"], "router");
    }

    #[tokio::test]
    async fn test_sink_side_error_surfaces() {
        let (addr, _seen) = spawn_sink_server(Some("table not found")).await;
        let (targets, round) = sample();

        let exporter = Exporter::connect(Arc::new(TcpSink::new(addr)), "d", "t", targets)
            .await
            .unwrap();
        let err = exporter.export(&round).await.unwrap_err();
        assert!(matches!(err, ExportError::Rejected(ref m) if m == "table not found"));
    }

    #[tokio::test]
    async fn test_connection_closed_before_ack() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            // accept and hang up immediately
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let sink = TcpSink::new(addr);
        let mut stream = sink.append_rows().await.unwrap();
        let _ = stream
            .send(AppendRowsRequest {
                write_stream: "s".into(),
                trace_id: "t".into(),
                writer_schema: RowSchema::health_check(),
                rows: vec![],
            })
            .await;
        let err = stream.recv().await.unwrap_err();
        assert!(matches!(err, ExportError::Closed | ExportError::Recv(_)));
    }

    #[tokio::test]
    async fn test_unreachable_sink() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let err = TcpSink::new(addr)
            .with_timeout(Duration::from_secs(2))
            .create_write_stream("d")
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Connect(_)));
    }
}
