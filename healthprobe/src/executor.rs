//! Round execution: every target probed concurrently under one deadline.
//!
//! Each target gets its own tokio task and the join handles are kept in
//! configuration order, so slot `i` of the round is written only by the task
//! for target `i`. The barrier waits on all handles against the same deadline
//! instant; a task still running at that instant is aborted and its slot is
//! filled with a timeout error.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use futures::future::join_all;
use healthprobe_common::{ProbeResult, Round};
use log::{debug, warn};
use tokio::time::{Instant, timeout_at};

use crate::probes::{ProbeError, ProbeTarget};
use crate::telemetry;

pub async fn execute_round(targets: &[ProbeTarget], deadline: Duration) -> Round {
    let timestamp = Utc::now().timestamp_micros();
    let expires = Instant::now() + deadline;
    debug!("round {} started with {} targets", timestamp, targets.len());

    let handles: Vec<_> = targets
        .iter()
        .map(|bound| {
            let target = bound.target.clone();
            let probe = Arc::clone(&bound.probe);
            tokio::spawn(async move {
                match probe.run(&target, deadline).await {
                    Ok(latency) => ProbeResult::success(&target.name, latency),
                    Err(e) => ProbeResult::failure(&target.name, e.to_string()),
                }
            })
        })
        .collect();

    let slots = handles
        .into_iter()
        .zip(targets)
        .map(|(mut handle, bound)| async move {
            let name = &bound.target.name;
            match timeout_at(expires, &mut handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    warn!("probe {} did not complete: {}", name, e);
                    ProbeResult::failure(name, ProbeError::Crashed(e.to_string()).to_string())
                }
                Err(_) => {
                    handle.abort();
                    warn!("probe {} exceeded the round deadline ({:?})", name, deadline);
                    ProbeResult::failure(name, ProbeError::Timeout.to_string())
                }
            }
        });

    let results = join_all(slots).await;
    for result in &results {
        telemetry::record_probe_result(result);
    }

    Round { timestamp, results }
}
