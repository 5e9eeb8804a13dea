//! Network reachability probes.
//!
//! ## Probes
//! - **PingProbe**: ICMP echo round trip via the system `ping` binary
//! - **DnsProbe**: name resolution latency against a specific nameserver
//! - **TcpConnectProbe**: TCP handshake latency to a `host:port`

pub mod dns;
pub mod ping;
pub mod tcp_connect;

pub use dns::DnsProbe;
pub use ping::PingProbe;
pub use tcp_connect::TcpConnectProbe;
