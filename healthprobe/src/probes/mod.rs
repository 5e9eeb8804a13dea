use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use healthprobe_common::{Target, TargetKind};
use thiserror::Error;

pub mod builtin;

use crate::probes::builtin::{DnsProbe, PingProbe, TcpConnectProbe};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("timeout")]
    Timeout,
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("resolve failed: {0}")]
    Resolve(String),
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("probe task failed: {0}")]
    Crashed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reachability/latency check against one target.
///
/// Implementations must return within `deadline` where they can and must
/// tolerate being dropped mid-flight: dropping the future is how the round
/// executor cancels a probe.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn run(&self, target: &Target, deadline: Duration) -> Result<Duration, ProbeError>;
}

/// A configured target bound to the probe that checks it.
#[derive(Clone)]
pub struct ProbeTarget {
    pub target: Target,
    pub probe: Arc<dyn Probe>,
}

impl ProbeTarget {
    pub fn new(target: Target, probe: Arc<dyn Probe>) -> Self {
        Self { target, probe }
    }
}

/// Builtin probes, one shared instance per target kind.
pub struct ProbeSet {
    ping: Arc<dyn Probe>,
    dns: Arc<dyn Probe>,
    tcp_connect: Arc<dyn Probe>,
}

impl Default for ProbeSet {
    fn default() -> Self {
        Self {
            ping: Arc::new(PingProbe::default()),
            dns: Arc::new(DnsProbe),
            tcp_connect: Arc::new(TcpConnectProbe),
        }
    }
}

impl ProbeSet {
    pub fn probe_for(&self, kind: TargetKind) -> Arc<dyn Probe> {
        match kind {
            TargetKind::Ping => Arc::clone(&self.ping),
            TargetKind::DnsResolve => Arc::clone(&self.dns),
            TargetKind::TcpConnect => Arc::clone(&self.tcp_connect),
        }
    }

    /// Bind every target to its probe, keeping configuration order.
    pub fn bind(&self, targets: &[Target]) -> Vec<ProbeTarget> {
        targets
            .iter()
            .map(|t| ProbeTarget::new(t.clone(), self.probe_for(t.kind)))
            .collect()
    }
}
