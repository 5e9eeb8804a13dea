use std::time::Duration;

use async_trait::async_trait;
use healthprobe_common::Target;
use log::{info, warn};
use tokio::{net::TcpStream, time::Instant};

use crate::probes::{Probe, ProbeError};

/// Measures the time to complete a TCP handshake with `host:port`.
pub struct TcpConnectProbe;

#[async_trait]
impl Probe for TcpConnectProbe {
    async fn run(&self, target: &Target, _deadline: Duration) -> Result<Duration, ProbeError> {
        if !target.address.contains(':') {
            return Err(ProbeError::InvalidAddress(target.address.clone()));
        }

        let start = Instant::now();
        match TcpStream::connect(target.address.as_str()).await {
            Ok(_stream) => {
                let latency = start.elapsed();
                info!("tcp_connect {} -> success ({:?})", target.address, latency);
                Ok(latency)
            }
            Err(e) => {
                warn!("tcp_connect {} -> fail ({})", target.address, e);
                Err(ProbeError::Unreachable(e.to_string()))
            }
        }
    }
}
