//! Data model shared between the probe daemon and status consumers.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default name looked up by DNS targets that don't set `query`.
pub const DEFAULT_DNS_QUERY: &str = "example.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Ping,
    DnsResolve,
    TcpConnect,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Ping => "ping",
            TargetKind::DnsResolve => "dns_resolve",
            TargetKind::TcpConnect => "tcp_connect",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named probe definition.
///
/// `address` is a host for `Ping`, a nameserver (`ip[:port]`) for
/// `DnsResolve` and a `host:port` for `TcpConnect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub kind: TargetKind,
    pub address: String,
    /// Name resolved by `DnsResolve` targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl Target {
    pub fn new(name: impl Into<String>, kind: TargetKind, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            address: address.into(),
            query: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn dns_query(&self) -> &str {
        self.query.as_deref().unwrap_or(DEFAULT_DNS_QUERY)
    }
}

/// Outcome of one probe within one round.
///
/// When `error` is set the probe failed and `latency_micros` is zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub target_name: String,
    pub latency_micros: i64,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn success(target_name: impl Into<String>, latency: Duration) -> Self {
        Self {
            target_name: target_name.into(),
            latency_micros: i64::try_from(latency.as_micros()).unwrap_or(i64::MAX),
            error: None,
        }
    }

    pub fn failure(target_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            latency_micros: 0,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn latency(&self) -> Option<Duration> {
        match self.error {
            None => Some(Duration::from_micros(self.latency_micros.max(0) as u64)),
            Some(_) => None,
        }
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error, self.latency()) {
            (Some(err), _) => write!(f, "{:<24} {:>6} ({})", self.target_name, "FAIL", err),
            (None, Some(latency)) => {
                write!(f, "{:<24} {:>6} ({:?})", self.target_name, "OK", latency)
            }
            (None, None) => write!(f, "{:<24} {:>6}", self.target_name, "OK"),
        }
    }
}

/// One complete cycle of probes sharing a start timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// Microseconds since the Unix epoch, taken when the round started.
    pub timestamp: i64,
    pub results: Vec<ProbeResult>,
}

impl Round {
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }

    /// Flatten the round into export rows.
    ///
    /// `targets` must be the configuration the round was executed against;
    /// results are matched to targets by position.
    pub fn rows(&self, targets: &[Target]) -> Vec<Row> {
        self.results
            .iter()
            .enumerate()
            .map(|(i, result)| {
                let target = targets.get(i);
                Row {
                    timestamp: self.timestamp,
                    target: result.target_name.clone(),
                    kind: target.map(|t| t.kind.as_str().to_string()),
                    address: target.map(|t| t.address.clone()),
                    latency_micros: result.latency_micros,
                    error: result.error.clone(),
                }
            })
            .collect()
    }
}

/// Export shape of a single probe result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub timestamp: i64,
    pub target: String,
    pub kind: Option<String>,
    pub address: Option<String>,
    pub latency_micros: i64,
    pub error: Option<String>,
}
