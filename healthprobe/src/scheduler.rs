//! Periodic driver for probe rounds.
//!
//! One round runs immediately, then one per interval tick. Rounds never
//! overlap: a round that overruns the interval delays the next tick. Each
//! completed round is pushed to history first, then queued for export. The
//! export queue is drained by a single worker task, so batches reach the sink
//! in round order without a slow sink holding up the next round.
//!
//! The queue is bounded. When it is full the round is still recorded in
//! history but its export is dropped with a warning, so a round reaches the
//! sink at most once rather than exactly once. On shutdown the queue gets
//! a fixed drain budget; whatever is still queued after that is abandoned.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use healthprobe_common::Round;
use log::{debug, error, info, warn};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::{MissedTickBehavior, interval, timeout},
};

use crate::executor::execute_round;
use crate::export::Exporter;
use crate::history::HistoryStore;
use crate::probes::ProbeTarget;
use crate::telemetry;

pub const DEFAULT_EXPORT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
/// Largest export queue accepted from configuration.
pub const MAX_EXPORT_QUEUE_DEPTH: usize = 4096;

/// Ordered hand-off of rounds to the export worker.
pub struct ExportQueue {
    tx: mpsc::Sender<Arc<Round>>,
    worker: JoinHandle<()>,
    // queued or in flight
    pending: Arc<AtomicUsize>,
    drain_timeout: Duration,
}

impl ExportQueue {
    pub fn spawn(exporter: Exporter, depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(depth.clamp(1, MAX_EXPORT_QUEUE_DEPTH));
        let pending = Arc::new(AtomicUsize::new(0));
        let worker = tokio::spawn(run_export_worker(exporter, rx, Arc::clone(&pending)));
        Self {
            tx,
            worker,
            pending,
            drain_timeout: DEFAULT_EXPORT_DRAIN_TIMEOUT,
        }
    }

    /// Upper bound on how long `close` waits for queued exports.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    fn enqueue(&self, round: Arc<Round>) {
        let timestamp = round.timestamp;
        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(round) {
            Ok(()) => {}
            // Dropping keeps memory bounded; the round is already in history.
            Err(TrySendError::Full(_)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                warn!("Export queue full; dropping export of round {}", timestamp);
                telemetry::record_export(None);
            }
            Err(TrySendError::Closed(_)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                error!("Export worker is gone; dropping export of round {}", timestamp);
                telemetry::record_export(None);
            }
        }
    }

    /// Stop accepting rounds and wait up to the drain timeout for queued
    /// exports. The worker is aborted if it is still busy after that.
    async fn close(self) {
        drop(self.tx);
        let mut worker = self.worker;
        match timeout(self.drain_timeout, &mut worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Export worker failed: {}", e),
            Err(_) => {
                worker.abort();
                let left = self.pending.load(Ordering::SeqCst);
                warn!(
                    "Export drain exceeded {:?}; {} rounds left unexported",
                    self.drain_timeout, left
                );
                telemetry::record_dropped_exports(left);
            }
        }
    }
}

async fn run_export_worker(
    exporter: Exporter,
    mut rx: mpsc::Receiver<Arc<Round>>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(round) = rx.recv().await {
        match exporter.export(&round).await {
            Ok(rows) => {
                info!("sent {} rows to sink (round {})", rows, round.timestamp);
                telemetry::record_export(Some(rows));
            }
            Err(e) => {
                error!("Export of round {} failed: {}", round.timestamp, e);
                telemetry::record_export(None);
            }
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    }
    debug!("Export worker stopped");
}

pub struct Scheduler {
    targets: Vec<ProbeTarget>,
    interval: Duration,
    round_deadline: Duration,
    history: Arc<HistoryStore>,
    exports: Option<ExportQueue>,
}

impl Scheduler {
    pub fn new(
        targets: Vec<ProbeTarget>,
        interval: Duration,
        round_deadline: Duration,
        history: Arc<HistoryStore>,
    ) -> Self {
        Self {
            targets,
            interval,
            round_deadline,
            history,
            exports: None,
        }
    }

    pub fn with_exports(mut self, exports: ExportQueue) -> Self {
        self.exports = Some(exports);
        self
    }

    /// Run rounds until `shutdown` resolves.
    ///
    /// Shutdown is only observed between rounds; an in-flight round always
    /// completes under its own deadline. Queued exports are then drained for
    /// at most the export queue's drain timeout.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Probing {} targets every {:?} (round deadline {:?})",
            self.targets.len(),
            self.interval,
            self.round_deadline
        );

        // First tick of a tokio interval completes immediately.
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("Scheduler stopped");
        if let Some(exports) = self.exports.take() {
            exports.close().await;
        }
    }

    /// Execute one round and hand it to history, then export.
    pub async fn tick(&self) -> Arc<Round> {
        debug!("tick");
        let round = Arc::new(execute_round(&self.targets, self.round_deadline).await);

        self.history.push(Arc::clone(&round));

        let failures = round.failures();
        telemetry::record_round(failures);
        for result in &round.results {
            debug!("{}", result);
        }
        if failures == 0 {
            info!("round {}: all {} probes ok", round.timestamp, round.results.len());
        } else {
            warn!(
                "round {}: {} of {} probes failed",
                round.timestamp,
                failures,
                round.results.len()
            );
        }

        if let Some(exports) = &self.exports {
            exports.enqueue(Arc::clone(&round));
        }
        round
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::MemorySink;
    use crate::probes::{Probe, ProbeError};
    use async_trait::async_trait;
    use healthprobe_common::{Target, TargetKind};

    struct FixedProbe(Result<Duration, &'static str>);

    #[async_trait]
    impl Probe for FixedProbe {
        async fn run(&self, _target: &Target, _deadline: Duration) -> Result<Duration, ProbeError> {
            self.0.map_err(|e| ProbeError::Unreachable(e.to_string()))
        }
    }

    fn targets() -> Vec<ProbeTarget> {
        vec![
            ProbeTarget::new(
                Target::new("up", TargetKind::Ping, "10.0.0.1"),
                Arc::new(FixedProbe(Ok(Duration::from_millis(1)))),
            ),
            ProbeTarget::new(
                Target::new("down", TargetKind::Ping, "10.0.0.2"),
                Arc::new(FixedProbe(Err("no replies"))),
            ),
        ]
    }

    async fn exporter(sink: &MemorySink) -> Exporter {
        let bound = targets();
        Exporter::connect(
            Arc::new(sink.clone()),
            "network/health_check",
            "test",
            bound.into_iter().map(|b| b.target).collect(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_tick_pushes_then_exports() {
        let sink = MemorySink::default();
        let history = Arc::new(HistoryStore::new(10));
        let scheduler = Scheduler::new(
            targets(),
            Duration::from_secs(60),
            Duration::from_secs(1),
            Arc::clone(&history),
        )
        .with_exports(ExportQueue::spawn(exporter(&sink).await, 4));

        let round = scheduler.tick().await;

        assert_eq!(history.latest(None), vec![Arc::clone(&round)]);
        scheduler.run_until(async {}).await;
        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].rows.len(), round.results.len());
    }

    #[tokio::test]
    async fn test_export_failure_keeps_history() {
        let sink = MemorySink::default();
        sink.reject_with("permission denied");
        let history = Arc::new(HistoryStore::new(10));
        let scheduler = Scheduler::new(
            targets(),
            Duration::from_secs(60),
            Duration::from_secs(1),
            Arc::clone(&history),
        )
        .with_exports(ExportQueue::spawn(exporter(&sink).await, 4));

        scheduler.tick().await;
        scheduler.tick().await;
        scheduler.run_until(async {}).await;

        assert_eq!(history.len(), 2);
        assert_eq!(sink.batches().len(), 2);
    }

    #[tokio::test]
    async fn test_slow_sink_does_not_delay_rounds() {
        let sink = MemorySink::default();
        sink.delay_acks(Duration::from_millis(300));
        let history = Arc::new(HistoryStore::new(10));
        let scheduler = Scheduler::new(
            targets(),
            Duration::from_secs(60),
            Duration::from_secs(1),
            Arc::clone(&history),
        )
        .with_exports(ExportQueue::spawn(exporter(&sink).await, 8));

        let start = std::time::Instant::now();
        for _ in 0..3 {
            scheduler.tick().await;
        }
        assert!(start.elapsed() < Duration::from_millis(300));
        assert_eq!(history.len(), 3);

        scheduler.run_until(async {}).await;
        let batches = sink.batches();
        assert_eq!(batches.len(), 3);
        let stamps: Vec<_> = history.latest(None).iter().rev().map(|r| r.timestamp).collect();
        let exported: Vec<_> = batches
            .iter()
            .map(|b| b.rows[0]["timestamp"].as_i64().unwrap())
            .collect();
        assert_eq!(stamps, exported);
    }

    #[tokio::test]
    async fn test_full_queue_drops_export_not_round() {
        let sink = MemorySink::default();
        sink.delay_acks(Duration::from_millis(200));
        let history = Arc::new(HistoryStore::new(10));
        let scheduler = Scheduler::new(
            targets(),
            Duration::from_secs(60),
            Duration::from_secs(1),
            Arc::clone(&history),
        )
        .with_exports(ExportQueue::spawn(exporter(&sink).await, 1));

        for _ in 0..5 {
            scheduler.tick().await;
        }
        scheduler.run_until(async {}).await;

        assert_eq!(history.len(), 5);
        let exported = sink.batches().len();
        assert!((1..5).contains(&exported), "exported {exported}");
    }

    #[tokio::test]
    async fn test_shutdown_drain_is_bounded() {
        let sink = MemorySink::default();
        sink.delay_acks(Duration::from_secs(2));
        let history = Arc::new(HistoryStore::new(10));
        let scheduler = Scheduler::new(
            targets(),
            Duration::from_millis(50),
            Duration::from_millis(5),
            Arc::clone(&history),
        )
        .with_exports(
            ExportQueue::spawn(exporter(&sink).await, 16)
                .with_drain_timeout(Duration::from_millis(300)),
        );

        let start = std::time::Instant::now();
        scheduler
            .run_until(tokio::time::sleep(Duration::from_millis(500)))
            .await;
        let elapsed = start.elapsed();

        assert!(elapsed < Duration::from_millis(1500), "took {:?}", elapsed);
        assert!(history.len() >= 5);
        // only the first batch made it past the stalled ack
        assert_eq!(sink.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_run_until_executes_immediately_then_on_ticks() {
        let history = Arc::new(HistoryStore::new(10));
        let scheduler = Scheduler::new(
            targets(),
            Duration::from_millis(200),
            Duration::from_millis(50),
            Arc::clone(&history),
        );

        scheduler
            .run_until(tokio::time::sleep(Duration::from_millis(300)))
            .await;

        let rounds = history.latest(None);
        assert_eq!(rounds.len(), 2);
        assert!(rounds[0].timestamp > rounds[1].timestamp);
    }
}
