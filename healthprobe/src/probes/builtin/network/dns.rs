//! DNS resolution probe.
//!
//! Resolves the target's `query` name against the target's nameserver and
//! reports the lookup time. Caching is disabled so every round hits the wire.

use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;
use healthprobe_common::Target;
use hickory_resolver::{
    TokioAsyncResolver,
    config::{NameServerConfigGroup, ResolverConfig, ResolverOpts},
};
use log::{info, warn};
use tokio::time::Instant;

use crate::probes::{Probe, ProbeError};

const DNS_PORT: u16 = 53;

pub struct DnsProbe;

#[async_trait]
impl Probe for DnsProbe {
    async fn run(&self, target: &Target, deadline: Duration) -> Result<Duration, ProbeError> {
        let nameserver = parse_nameserver(&target.address)?;
        let query = target.dns_query();

        let group = NameServerConfigGroup::from_ips_clear(&[nameserver.ip()], nameserver.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], group);
        let mut opts = ResolverOpts::default();
        opts.timeout = deadline;
        opts.attempts = 1;
        opts.cache_size = 0;
        let resolver = TokioAsyncResolver::tokio(config, opts);

        let start = Instant::now();
        match resolver.lookup_ip(query).await {
            Ok(_) => {
                let latency = start.elapsed();
                info!("resolve {} @ {} -> success ({:?})", query, nameserver, latency);
                Ok(latency)
            }
            Err(e) => {
                warn!("resolve {} @ {} -> fail ({})", query, nameserver, e);
                Err(ProbeError::Resolve(e.to_string()))
            }
        }
    }
}

/// Parse `ip` or `ip:port` (IPv6 as `[ip]:port`), defaulting to port 53.
fn parse_nameserver(address: &str) -> Result<SocketAddr, ProbeError> {
    let address = address.trim();
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }
    address
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
        .map_err(|_| ProbeError::InvalidAddress(address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthprobe_common::TargetKind;

    #[test]
    fn test_parse_nameserver_default_port() {
        let addr = parse_nameserver("1.1.1.1").unwrap();
        assert_eq!(addr, "1.1.1.1:53".parse().unwrap());
    }

    #[test]
    fn test_parse_nameserver_explicit_port() {
        let addr = parse_nameserver("192.168.88.1:5353").unwrap();
        assert_eq!(addr.port(), 5353);

        let v6 = parse_nameserver("[2606:4700:4700::1111]:53").unwrap();
        assert!(v6.is_ipv6());
    }

    #[test]
    fn test_parse_nameserver_rejects_hostnames() {
        assert!(matches!(
            parse_nameserver("dns.google"),
            Err(ProbeError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_nameserver_fails_fast() {
        let target = Target::new("bad", TargetKind::DnsResolve, "not-an-ip");
        let err = DnsProbe
            .run(&target, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidAddress(_)));
    }
}
