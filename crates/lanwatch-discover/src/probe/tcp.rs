//! TCP probes built on plain connect attempts.
//!
//! The SYN probe needs an established connection. The ACK probe accepts an
//! established connection *or* a reset: a RST proves a live TCP stack, so it
//! separates "host present, port closed" from "host absent".

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use futures::stream::{self, FuturesUnordered, StreamExt};
use tokio::net::TcpStream;

use super::ProbeOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectVerdict {
    Open,
    /// The host answered with a reset.
    Refused,
    /// Timed out, unreachable, or any other failure.
    Silent,
}

async fn connect(addr: SocketAddr, timeout: Duration) -> (ConnectVerdict, Duration) {
    let start = Instant::now();
    let verdict = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => ConnectVerdict::Open,
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => ConnectVerdict::Refused,
        _ => ConnectVerdict::Silent,
    };
    (verdict, start.elapsed())
}

/// Try every port at once; the first accepted verdict wins.
async fn first_response(
    ip: Ipv4Addr,
    ports: &[u16],
    timeout: Duration,
    accept: fn(ConnectVerdict) -> bool,
) -> ProbeOutcome {
    let mut pending: FuturesUnordered<_> = ports
        .iter()
        .map(|&port| connect(SocketAddr::from((ip, port)), timeout))
        .collect();

    while let Some((verdict, latency)) = pending.next().await {
        if accept(verdict) {
            return ProbeOutcome::Responded {
                latency: Some(latency),
            };
        }
    }
    ProbeOutcome::NoResponse
}

pub async fn syn_probe(ip: Ipv4Addr, ports: &[u16], timeout: Duration) -> ProbeOutcome {
    first_response(ip, ports, timeout, |v| v == ConnectVerdict::Open).await
}

pub async fn ack_probe(ip: Ipv4Addr, ports: &[u16], timeout: Duration) -> ProbeOutcome {
    first_response(ip, ports, timeout, |v| {
        matches!(v, ConnectVerdict::Open | ConnectVerdict::Refused)
    })
    .await
}

/// Open ports among `ports`, ascending.
pub async fn scan_ports(
    ip: Ipv4Addr,
    ports: &[u16],
    timeout: Duration,
    concurrency: usize,
) -> Vec<u16> {
    let mut open: Vec<u16> = stream::iter(ports.iter().copied())
        .map(|port| async move {
            let (verdict, _) = connect(SocketAddr::from((ip, port)), timeout).await;
            (verdict == ConnectVerdict::Open).then_some(port)
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|port| async move { port })
        .collect()
        .await;
    open.sort_unstable();
    open
}
