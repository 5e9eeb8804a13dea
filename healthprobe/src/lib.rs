pub mod executor;
pub mod export;
pub mod history;
pub mod probes;
pub mod scheduler;
pub mod settings;
pub mod telemetry;

use std::{future::Future, sync::Arc};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::signal;

use crate::export::{Exporter, Sink, TcpSink};
use crate::history::{HistoryStore, StatusReader};
use crate::probes::{ProbeSet, ProbeTarget};
use crate::scheduler::{ExportQueue, Scheduler};
use crate::settings::Settings;

pub use healthprobe_common::{ProbeResult, Round, Target, TargetKind};

pub struct HealthProbeEngine {
    pub settings: Settings,
    scheduler: Scheduler,
    status: StatusReader,
}

impl HealthProbeEngine {
    /// Bind the configured targets to the builtin probes and connect the sink.
    ///
    /// Any error here means the process is misconfigured and should exit.
    pub async fn new(settings: Settings) -> Result<Self> {
        let targets = ProbeSet::default().bind(&settings.targets);
        let sink: Option<Arc<dyn Sink>> = match &settings.sink.endpoint {
            Some(endpoint) => {
                info!("Analytics sink: {}", endpoint);
                Some(Arc::new(TcpSink::new(endpoint.as_str())))
            }
            None => {
                info!("Sink endpoint not set. Export disabled.");
                None
            }
        };
        Self::with_parts(settings, targets, sink).await
    }

    /// Build an engine from already-bound probes and an optional sink.
    pub async fn with_parts(
        settings: Settings,
        targets: Vec<ProbeTarget>,
        sink: Option<Arc<dyn Sink>>,
    ) -> Result<Self> {
        settings.validate().context("Invalid settings")?;
        if targets.is_empty() {
            warn!("No targets configured; rounds will be empty");
        }

        let history = Arc::new(HistoryStore::new(settings.history_capacity()));
        let status = StatusReader::new(Arc::clone(&history));

        let mut scheduler = Scheduler::new(
            targets.clone(),
            settings.interval(),
            settings.round_deadline(),
            history,
        );

        if let Some(sink) = sink {
            let destination = settings.sink.destination();
            info!("Export destination: {}", destination);
            let exporter = Exporter::connect(
                sink,
                destination,
                settings.sink.trace_id(),
                targets.into_iter().map(|t| t.target).collect(),
            )
            .await
            .with_context(|| format!("Failed to create write stream for {}", destination))?;
            info!("Export trace id: {}", exporter.trace_id());
            scheduler = scheduler.with_exports(
                ExportQueue::spawn(exporter, settings.export_queue_depth())
                    .with_drain_timeout(settings.export_drain_timeout()),
            );
        }

        Ok(Self {
            settings,
            scheduler,
            status,
        })
    }

    /// Read-only handle on the round history.
    pub fn status(&self) -> StatusReader {
        self.status.clone()
    }

    pub async fn run(self) -> Result<()> {
        info!("Monitoring active. Press Ctrl-C to exit.");
        let shutdown = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Exiting...");
        };
        self.run_until(shutdown).await
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.scheduler.run_until(shutdown).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::MemorySink;

    #[tokio::test]
    async fn test_invalid_settings_are_fatal() {
        let settings = Settings {
            round_deadline_ms: Some(0),
            ..Default::default()
        };
        assert!(HealthProbeEngine::with_parts(settings, vec![], None).await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_sink_is_fatal() {
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let mut settings = Settings::default();
        settings.sink.endpoint = Some(addr);

        let err = HealthProbeEngine::new(settings).await.err().unwrap();
        assert!(format!("{:#}", err).contains("Failed to create write stream"));
    }

    #[tokio::test]
    async fn test_write_stream_created_at_init() {
        let sink = MemorySink::default();
        let mut settings = Settings::default();
        settings.sink.destination = Some("network/reachability".to_string());

        let engine = HealthProbeEngine::with_parts(settings, vec![], Some(Arc::new(sink.clone())))
            .await
            .unwrap();

        assert_eq!(sink.write_streams(), ["network/reachability/streams/0"]);
        assert!(engine.status().latest(None).is_empty());
        assert_eq!(engine.status().capacity(), engine.settings.history_capacity());
    }
}
