//! Result aggregation.
//!
//! Turns raw host verdicts into observations: the online hosts are enriched
//! with hardware address, hostname, vendor, open ports, and an inferred
//! device type. Enrichment is opportunistic; a lookup that fails simply
//! leaves the attribute empty.

use std::net::Ipv4Addr;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::probe::{ArpTable, Network};
use crate::retry::HostVerdict;
use crate::vendor::{VendorCache, UNKNOWN_VENDOR};

/// One host's verdict plus everything learned about it in this pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub ip: Ipv4Addr,
    pub online: bool,
    pub response_time_ms: Option<u32>,
    pub mac: Option<String>,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
    pub device_type: Option<String>,
    /// `None` when no port scan ran.
    pub open_ports: Option<Vec<u16>>,
}

impl Observation {
    pub fn offline(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            online: false,
            response_time_ms: None,
            mac: None,
            hostname: None,
            vendor: None,
            device_type: None,
            open_ports: None,
        }
    }
}

/// Which enrichment steps run for online hosts.
#[derive(Debug, Clone)]
pub struct Enrichment {
    pub resolve_hostnames: bool,
    pub fetch_vendor_info: bool,
    /// Ports for the auxiliary scan; empty disables it.
    pub scan_ports: Vec<u16>,
    pub timeout: Duration,
    pub concurrency: usize,
}

/// Build observations for every verdict. Offline verdicts pass through
/// without enrichment.
pub async fn aggregate(
    network: &dyn Network,
    vendors: &VendorCache,
    neighbours: &ArpTable,
    verdicts: Vec<HostVerdict>,
    enrichment: &Enrichment,
) -> Vec<Observation> {
    stream::iter(verdicts)
        .map(|verdict| observe(network, vendors, neighbours, verdict, enrichment))
        .buffer_unordered(enrichment.concurrency.max(1))
        .collect()
        .await
}

async fn observe(
    network: &dyn Network,
    vendors: &VendorCache,
    neighbours: &ArpTable,
    verdict: HostVerdict,
    enrichment: &Enrichment,
) -> Observation {
    let ip = verdict.ip;
    if !verdict.online {
        return Observation::offline(ip);
    }

    let mac = neighbours.mac_of(&ip).map(str::to_string);

    let hostname = if enrichment.resolve_hostnames {
        match neighbours.hostname_of(&ip) {
            Some(name) => Some(name.to_string()),
            None => network.resolve_hostname(ip, enrichment.timeout).await,
        }
    } else {
        None
    };

    let vendor = match &mac {
        Some(mac) if enrichment.fetch_vendor_info => {
            Some(vendors.lookup(mac)).filter(|v| v != UNKNOWN_VENDOR)
        }
        _ => None,
    };

    let open_ports = if enrichment.scan_ports.is_empty() {
        None
    } else {
        Some(
            network
                .open_ports(ip, &enrichment.scan_ports, enrichment.timeout)
                .await,
        )
    };

    let device_type = infer_device_type(vendor.as_deref(), open_ports.as_deref());

    Observation {
        ip,
        online: true,
        response_time_ms: verdict.response_time_ms(),
        mac,
        hostname,
        vendor,
        device_type,
        open_ports,
    }
}

// ── Device type inference ─────────────────────────────────────────

const WEB_PORTS: &[u16] = &[80, 443, 8080];
const ROUTER_SERVICE_PORTS: &[u16] = &[22, 23, 53];
const PRINTER_PORTS: &[u16] = &[515, 631, 9100];
const FILE_SERVER_PORTS: &[u16] = &[139, 445, 548, 2049];
const REMOTE_LOGIN_PORTS: &[u16] = &[22, 3389];

/// Guess a device category. Open ports are more specific than the vendor,
/// so they win when they match anything.
pub fn infer_device_type(vendor: Option<&str>, open_ports: Option<&[u16]>) -> Option<String> {
    open_ports
        .and_then(type_from_ports)
        .or_else(|| vendor.and_then(type_from_vendor))
        .map(str::to_string)
}

fn type_from_ports(ports: &[u16]) -> Option<&'static str> {
    let any = |set: &[u16]| ports.iter().any(|p| set.contains(p));

    if any(WEB_PORTS) && any(ROUTER_SERVICE_PORTS) {
        return Some("Router/Gateway");
    }
    if any(PRINTER_PORTS) {
        return Some("Network Printer");
    }
    if any(FILE_SERVER_PORTS) {
        return Some("NAS/File Server");
    }
    if any(REMOTE_LOGIN_PORTS) {
        return Some("Computer");
    }
    if !ports.is_empty() && ports.len() <= 2 && ports.iter().any(|&p| p > 1024) {
        return Some("Mobile Device");
    }
    None
}

fn type_from_vendor(vendor: &str) -> Option<&'static str> {
    let vendor = vendor.to_lowercase();
    let has = |keys: &[&str]| keys.iter().any(|k| vendor.contains(k));
    // "lg" is too short for a substring match.
    let has_word = |word: &str| {
        vendor
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|w| w == word)
    };

    if has(&["apple", "iphone", "ipad"]) {
        Some("Apple Device")
    } else if has(&["samsung", "xiaomi", "huawei"]) || has_word("lg") {
        Some("Mobile Device")
    } else if has(&["tp-link", "netgear", "linksys", "cisco"]) {
        Some("Router/Gateway")
    } else if has(&["vmware", "virtualbox", "qemu"]) {
        Some("Virtual Machine")
    } else if has(&["intel", "realtek", "broadcom"]) {
        Some("Computer")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use lanwatch_core::config::ProbeMethod;

    use crate::probe::{NeighbourEntry, NeighbourState, ProbeOutcome};

    #[derive(Default)]
    struct Resolver {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl Network for Resolver {
        async fn probe(&self, _: Ipv4Addr, _: &ProbeMethod, _: Duration) -> ProbeOutcome {
            ProbeOutcome::NoResponse
        }

        async fn neighbours(&self) -> ArpTable {
            ArpTable::default()
        }

        async fn resolve_hostname(&self, ip: Ipv4Addr, _: Duration) -> Option<String> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            (ip.octets()[3] == 10).then(|| "desk.lan".to_string())
        }

        async fn open_ports(&self, _: Ipv4Addr, ports: &[u16], _: Duration) -> Vec<u16> {
            ports.iter().copied().filter(|p| *p == 9100).collect()
        }
    }

    fn verdict(last: u8, online: bool) -> HostVerdict {
        HostVerdict {
            ip: Ipv4Addr::new(192, 168, 1, last),
            online,
            response_time: online.then(|| Duration::from_millis(12)),
            method: None,
            attempts: 1,
        }
    }

    fn neighbours() -> ArpTable {
        ArpTable::from_entries([
            NeighbourEntry {
                ip: Ipv4Addr::new(192, 168, 1, 10),
                mac: Some("B8:27:EB:00:00:10".into()),
                state: NeighbourState::Reachable,
                hostname: None,
            },
            NeighbourEntry {
                ip: Ipv4Addr::new(192, 168, 1, 11),
                mac: Some("02:00:00:00:00:11".into()),
                state: NeighbourState::Complete,
                hostname: Some("printer.lan".into()),
            },
        ])
    }

    fn enrichment(scan_ports: Vec<u16>) -> Enrichment {
        Enrichment {
            resolve_hostnames: true,
            fetch_vendor_info: true,
            scan_ports,
            timeout: Duration::from_millis(10),
            concurrency: 4,
        }
    }

    fn find(observations: &[Observation], last: u8) -> &Observation {
        observations
            .iter()
            .find(|o| o.ip.octets()[3] == last)
            .unwrap()
    }

    #[tokio::test]
    async fn online_hosts_are_enriched() {
        let net = Resolver::default();
        let observations = aggregate(
            &net,
            &VendorCache::new(),
            &neighbours(),
            vec![verdict(10, true), verdict(11, true)],
            &enrichment(vec![]),
        )
        .await;

        let pi = find(&observations, 10);
        assert_eq!(pi.mac.as_deref(), Some("B8:27:EB:00:00:10"));
        assert_eq!(pi.hostname.as_deref(), Some("desk.lan"));
        assert_eq!(pi.vendor.as_deref(), Some("Raspberry Pi Foundation"));
        assert_eq!(pi.response_time_ms, Some(12));
        assert_eq!(pi.open_ports, None);

        let printer = find(&observations, 11);
        assert_eq!(printer.hostname.as_deref(), Some("printer.lan"));
        assert_eq!(printer.vendor, None, "unknown vendor is left empty");
        // Only .10 needed reverse DNS.
        assert_eq!(net.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn offline_hosts_are_not_enriched() {
        let net = Resolver::default();
        let observations = aggregate(
            &net,
            &VendorCache::new(),
            &neighbours(),
            vec![verdict(10, false)],
            &enrichment(vec![22, 9100]),
        )
        .await;
        assert_eq!(
            observations,
            vec![Observation::offline(Ipv4Addr::new(192, 168, 1, 10))]
        );
        assert_eq!(net.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn port_scan_feeds_device_type() {
        let net = Resolver::default();
        let observations = aggregate(
            &net,
            &VendorCache::new(),
            &neighbours(),
            vec![verdict(11, true)],
            &enrichment(vec![22, 9100]),
        )
        .await;
        let printer = find(&observations, 11);
        assert_eq!(printer.open_ports, Some(vec![9100]));
        assert_eq!(printer.device_type.as_deref(), Some("Network Printer"));
    }

    #[test]
    fn device_type_from_vendor() {
        let cases = [
            ("Apple, Inc.", Some("Apple Device")),
            ("Samsung Electronics Co.,Ltd", Some("Mobile Device")),
            ("LG Electronics", Some("Mobile Device")),
            ("TP-Link Technologies Co.,Ltd", Some("Router/Gateway")),
            ("VMware, Inc.", Some("Virtual Machine")),
            ("Intel Corporate", Some("Computer")),
            ("Raspberry Pi Foundation", None),
        ];
        for (vendor, expected) in cases {
            assert_eq!(
                infer_device_type(Some(vendor), None).as_deref(),
                expected,
                "{vendor}"
            );
        }
    }

    #[test]
    fn device_type_from_ports() {
        let cases: [(&[u16], Option<&str>); 6] = [
            (&[80, 53], Some("Router/Gateway")),
            (&[631], Some("Network Printer")),
            (&[445, 22], Some("NAS/File Server")),
            (&[22], Some("Computer")),
            (&[62078], Some("Mobile Device")),
            (&[], None),
        ];
        for (ports, expected) in cases {
            assert_eq!(infer_device_type(None, Some(ports)).as_deref(), expected, "{ports:?}");
        }
    }

    #[test]
    fn ports_take_precedence_over_vendor() {
        assert_eq!(
            infer_device_type(Some("Apple, Inc."), Some(&[3389][..])).as_deref(),
            Some("Computer")
        );
        assert_eq!(
            infer_device_type(Some("Apple, Inc."), Some(&[][..])).as_deref(),
            Some("Apple Device")
        );
    }
}
