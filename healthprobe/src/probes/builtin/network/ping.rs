//! ICMP reachability probe.
//!
//! Shells out to the system `ping` so the daemon doesn't need raw socket
//! privileges itself. The child is spawned with `kill_on_drop`, so when the
//! round deadline drops this future the `ping` process goes with it.

use std::{process::Stdio, sync::LazyLock, time::Duration};

use async_trait::async_trait;
use healthprobe_common::Target;
use log::{debug, info, warn};
use regex::Regex;
use tokio::process::Command;

use crate::probes::{Probe, ProbeError};

/// Echo requests sent per probe.
const PING_COUNT: u32 = 3;

// iputils: "rtt min/avg/max/mdev = 0.031/0.042/0.053/0.009 ms"
// busybox/bsd: "round-trip min/avg/max[/stddev] = 0.062/0.083/0.112 ms"
static RTT_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:rtt|round-trip) min/avg/max(?:/\w+)? = [\d.]+/([\d.]+)/")
        .expect("static regex")
});

pub struct PingProbe {
    binary: String,
    count: u32,
}

impl Default for PingProbe {
    fn default() -> Self {
        Self {
            binary: "ping".to_string(),
            count: PING_COUNT,
        }
    }
}

#[async_trait]
impl Probe for PingProbe {
    async fn run(&self, target: &Target, deadline: Duration) -> Result<Duration, ProbeError> {
        if target.address.trim().is_empty() {
            return Err(ProbeError::InvalidAddress(target.address.clone()));
        }

        // -W is per-reply wait in whole seconds
        let wait_secs = deadline.as_secs().max(1);
        let output = Command::new(&self.binary)
            .arg("-n")
            .arg("-c")
            .arg(self.count.to_string())
            .arg("-W")
            .arg(wait_secs.to_string())
            .arg(&target.address)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("ping {} exited with {}", target.address, output.status);

        match parse_avg_rtt(&stdout) {
            Some(rtt) => {
                info!("ping {} -> success ({:?})", target.address, rtt);
                Ok(rtt)
            }
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let reason = stderr.trim();
                let reason = if reason.is_empty() { "no replies" } else { reason };
                warn!("ping {} -> fail ({})", target.address, reason);
                Err(ProbeError::Unreachable(reason.to_string()))
            }
        }
    }
}

/// Extract the average round trip from `ping` summary output.
pub fn parse_avg_rtt(output: &str) -> Option<Duration> {
    let caps = RTT_SUMMARY.captures(output)?;
    let avg_ms: f64 = caps.get(1)?.as_str().parse().ok()?;
    if !avg_ms.is_finite() || avg_ms < 0.0 {
        return None;
    }
    Some(Duration::from_micros((avg_ms * 1000.0).round() as u64))
}
