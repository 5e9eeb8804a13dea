pub mod network;

// Re-export all probes for convenience
pub use network::{DnsProbe, PingProbe, TcpConnectProbe};
