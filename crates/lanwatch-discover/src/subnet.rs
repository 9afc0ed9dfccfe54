//! Subnet resolution.
//!
//! Picks the CIDR to scan (request override, then the configured subnet,
//! then the first usable local interface) and expands it to the candidate
//! host list.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use serde::Serialize;

use lanwatch_core::config::ScanConfig;
use lanwatch_core::error::ConfigError;

/// Largest host set a single pass will expand (a /16).
pub const MAX_HOSTS: u64 = 65_534;

/// Interface name prefixes that never carry the LAN.
const VIRTUAL_PREFIXES: &[&str] = &["lo", "docker", "veth", "br-", "virbr", "utun", "tun", "tap"];

/// The subnet of one pass and its candidate hosts.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSubnet {
    pub network: Ipv4Net,
    pub hosts: Vec<Ipv4Addr>,
}

/// Resolve the subnet for a pass and expand it, minus exclusions.
pub fn resolve(config: &ScanConfig, override_cidr: Option<&str>) -> Result<ResolvedSubnet, ConfigError> {
    let explicit = override_cidr
        .or(config.subnet_cidr.as_deref())
        .map(str::trim)
        .filter(|c| !c.is_empty());

    let network = match explicit {
        Some(cidr) => parse_cidr(cidr)?,
        None if config.auto_detect_subnet => detect_local_subnet()?,
        None => return Err(ConfigError::MissingSubnet),
    };

    let host_count = num_hosts(&network);
    if host_count > MAX_HOSTS {
        return Err(ConfigError::InvalidCidr(format!(
            "{network}: {host_count} hosts exceeds the limit of {MAX_HOSTS}"
        )));
    }

    let excluded = config.excluded()?;
    Ok(ResolvedSubnet {
        network,
        hosts: expand_hosts(&network, &excluded),
    })
}

/// Parse a CIDR, normalising host bits away (`192.168.1.7/24` → `192.168.1.0/24`).
pub fn parse_cidr(cidr: &str) -> Result<Ipv4Net, ConfigError> {
    cidr.trim()
        .parse::<Ipv4Net>()
        .map(|net| net.trunc())
        .map_err(|_| ConfigError::InvalidCidr(cidr.to_string()))
}

/// Usable host addresses: network and broadcast addresses are dropped for
/// prefixes shorter than /31, as are exclusions.
pub fn expand_hosts(network: &Ipv4Net, exclude: &[Ipv4Addr]) -> Vec<Ipv4Addr> {
    let excluded: HashSet<&Ipv4Addr> = exclude.iter().collect();
    network.hosts().filter(|ip| !excluded.contains(ip)).collect()
}

pub fn num_hosts(network: &Ipv4Net) -> u64 {
    let total = 1u64 << (32 - u32::from(network.prefix_len()));
    if network.prefix_len() < 31 {
        total - 2
    } else {
        total
    }
}

/// Derive the subnet from the first usable IPv4 interface.
pub fn detect_local_subnet() -> Result<Ipv4Net, ConfigError> {
    let interfaces = NetworkInterface::show().map_err(|e| {
        tracing::warn!(error = %e, "Failed to enumerate network interfaces");
        ConfigError::NoUsableInterface
    })?;

    let candidates = interfaces.iter().flat_map(|iface| {
        iface.addr.iter().filter_map(move |addr| match addr {
            Addr::V4(v4) => Some((iface.name.as_str(), v4.ip, v4.netmask)),
            Addr::V6(_) => None,
        })
    });

    let network = pick_subnet(candidates).ok_or(ConfigError::NoUsableInterface)?;
    tracing::info!(subnet = %network, "Auto-detected local subnet");
    Ok(network)
}

/// Choose the LAN subnet from `(interface, address, netmask)` triples.
/// An interface without a netmask is assumed to be a /24.
fn pick_subnet<'a>(
    candidates: impl IntoIterator<Item = (&'a str, Ipv4Addr, Option<Ipv4Addr>)>,
) -> Option<Ipv4Net> {
    candidates
        .into_iter()
        .filter(|(name, ip, _)| {
            !VIRTUAL_PREFIXES.iter().any(|p| name.starts_with(p))
                && !ip.is_loopback()
                && !ip.is_unspecified()
                && !ip.is_link_local()
        })
        .find_map(|(_, ip, netmask)| {
            let net = match netmask {
                Some(mask) => Ipv4Net::with_netmask(ip, mask).ok()?,
                None => Ipv4Net::new(ip, 24).ok()?,
            };
            // Point-to-point links are not scannable LANs.
            (net.prefix_len() < 31).then(|| net.trunc())
        })
}

// ── Network test ──────────────────────────────────────────────────

/// Configuration feedback for a candidate subnet. No probing is done.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NetworkTestResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_hosts: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_length: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn test_network(cidr: &str) -> NetworkTestResult {
    if cidr.trim().is_empty() {
        return NetworkTestResult::failed("No subnet CIDR provided".to_string());
    }
    match parse_cidr(cidr) {
        Ok(net) => NetworkTestResult {
            valid: true,
            network_address: Some(net.network().to_string()),
            broadcast_address: Some(net.broadcast().to_string()),
            num_hosts: Some(num_hosts(&net)),
            prefix_length: Some(net.prefix_len()),
            error: None,
        },
        Err(e) => NetworkTestResult::failed(e.to_string()),
    }
}

impl NetworkTestResult {
    fn failed(error: String) -> Self {
        Self {
            valid: false,
            network_address: None,
            broadcast_address: None,
            num_hosts: None,
            prefix_length: None,
            error: Some(error),
        }
    }
}
