//! Liveness probes.
//!
//! The [`Network`] trait is the seam between the engine and the host
//! network stack. [`SystemNetwork`] runs every method without raw sockets:
//! the system `ping` for ICMP, TCP connect attempts for the SYN and ACK
//! probes, and the kernel neighbour table for ARP.

pub mod arp;
pub mod icmp;
pub mod tcp;

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;

use lanwatch_core::config::ProbeMethod;

pub use arp::{ArpTable, NeighbourEntry, NeighbourState};

/// Concurrent connects during an auxiliary port scan of one host.
const PORT_SCAN_CONCURRENCY: usize = 64;

/// Result of one probe method against one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// `latency` is `None` for methods with no round trip (neighbour table).
    Responded { latency: Option<Duration> },
    NoResponse,
}

impl ProbeOutcome {
    pub fn responded(&self) -> bool {
        matches!(self, Self::Responded { .. })
    }

    pub fn latency(&self) -> Option<Duration> {
        match self {
            Self::Responded { latency } => *latency,
            Self::NoResponse => None,
        }
    }
}

/// Access to the local network.
///
/// Probe failures of any kind (unreachable, timeout, missing tool) are
/// reported as [`ProbeOutcome::NoResponse`]; nothing here is fallible.
#[async_trait]
pub trait Network: Send + Sync {
    /// Run one probe method against one host.
    async fn probe(&self, ip: Ipv4Addr, method: &ProbeMethod, timeout: Duration) -> ProbeOutcome;

    /// A fresh snapshot of the neighbour table.
    async fn neighbours(&self) -> ArpTable;

    /// Reverse-resolve a host name.
    async fn resolve_hostname(&self, ip: Ipv4Addr, timeout: Duration) -> Option<String>;

    /// Ports from `ports` that accept a TCP connection.
    async fn open_ports(&self, ip: Ipv4Addr, ports: &[u16], timeout: Duration) -> Vec<u16>;
}

/// The host's network stack.
#[derive(Debug, Default)]
pub struct SystemNetwork {
    arp: arp::ArpCache,
}

impl SystemNetwork {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Network for SystemNetwork {
    async fn probe(&self, ip: Ipv4Addr, method: &ProbeMethod, timeout: Duration) -> ProbeOutcome {
        match method {
            ProbeMethod::Icmp => icmp::ping(ip, timeout).await,
            ProbeMethod::TcpSyn(ports) => tcp::syn_probe(ip, ports, timeout).await,
            ProbeMethod::TcpAck(ports) => tcp::ack_probe(ip, ports, timeout).await,
            ProbeMethod::Arp => self.arp.probe(ip, timeout).await,
        }
    }

    async fn neighbours(&self) -> ArpTable {
        self.arp.refresh().await
    }

    async fn resolve_hostname(&self, ip: Ipv4Addr, timeout: Duration) -> Option<String> {
        let addr = IpAddr::V4(ip);
        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&addr).ok());
        let name = tokio::time::timeout(timeout, lookup).await.ok()?.ok()??;
        // Without a PTR record the resolver echoes the address back.
        (name != ip.to_string()).then_some(name)
    }

    async fn open_ports(&self, ip: Ipv4Addr, ports: &[u16], timeout: Duration) -> Vec<u16> {
        tcp::scan_ports(ip, ports, timeout, PORT_SCAN_CONCURRENCY).await
    }
}
