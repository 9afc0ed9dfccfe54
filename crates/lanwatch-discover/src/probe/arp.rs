//! Kernel neighbour (ARP) table.
//!
//! Read with `ip -4 neigh show`, falling back to `arp -an` where iproute2
//! is absent (BSD, macOS). Only entries the kernel still trusts count as
//! proof of life; STALE, FAILED, and INCOMPLETE entries do not.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::sync::Mutex;

use lanwatch_core::types::normalize_mac;

use super::ProbeOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighbourState {
    Reachable,
    Delay,
    Probe,
    Permanent,
    Stale,
    Failed,
    Incomplete,
    NoArp,
    /// Resolved entry from a source that reports no state (`arp -an`).
    Complete,
}

impl NeighbourState {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "REACHABLE" => Self::Reachable,
            "DELAY" => Self::Delay,
            "PROBE" => Self::Probe,
            "PERMANENT" => Self::Permanent,
            "STALE" => Self::Stale,
            "FAILED" => Self::Failed,
            "INCOMPLETE" => Self::Incomplete,
            "NOARP" => Self::NoArp,
            _ => return None,
        })
    }

    /// Whether the entry is fresh enough to count as a response.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Reachable | Self::Delay | Self::Probe | Self::Permanent | Self::Complete
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighbourEntry {
    pub ip: Ipv4Addr,
    /// Normalised hardware address, when resolved.
    pub mac: Option<String>,
    pub state: NeighbourState,
    /// Name printed by `arp -a`, when present.
    pub hostname: Option<String>,
}

/// One snapshot of the neighbour table, keyed by IP.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArpTable {
    entries: HashMap<Ipv4Addr, NeighbourEntry>,
}

impl ArpTable {
    pub fn from_entries(entries: impl IntoIterator<Item = NeighbourEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.ip, e)).collect(),
        }
    }

    pub fn get(&self, ip: &Ipv4Addr) -> Option<&NeighbourEntry> {
        self.entries.get(ip)
    }

    pub fn is_live(&self, ip: &Ipv4Addr) -> bool {
        self.get(ip).is_some_and(|e| e.state.is_live() && e.mac.is_some())
    }

    /// Hardware address of `ip`, from any entry that carries one.
    pub fn mac_of(&self, ip: &Ipv4Addr) -> Option<&str> {
        self.get(ip).and_then(|e| e.mac.as_deref())
    }

    pub fn hostname_of(&self, ip: &Ipv4Addr) -> Option<&str> {
        self.get(ip).and_then(|e| e.hostname.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Parsing ───────────────────────────────────────────────────────

/// Parse `ip -4 neigh show` output:
/// `192.168.1.1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE`
pub fn parse_ip_neigh(output: &str) -> ArpTable {
    let entries = output.lines().filter_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let ip: Ipv4Addr = tokens.first()?.parse().ok()?;
        let mac = tokens
            .iter()
            .position(|t| *t == "lladdr")
            .and_then(|i| tokens.get(i + 1))
            .and_then(|raw| normalize_mac(raw));
        let state = tokens
            .iter()
            .rev()
            .find_map(|t| NeighbourState::parse(t))
            .unwrap_or(NeighbourState::Incomplete);
        Some(NeighbourEntry {
            ip,
            mac,
            state,
            hostname: None,
        })
    });
    ArpTable::from_entries(entries)
}

/// Parse BSD/Linux `arp -a` output:
/// `router.lan (192.168.1.1) at aa:bb:cc:dd:ee:ff [ether] on eth0`
pub fn parse_arp_a(output: &str) -> ArpTable {
    let entries = output.lines().filter_map(|line| {
        let open = line.find('(')?;
        let close = open + line[open..].find(')')?;
        let ip: Ipv4Addr = line[open + 1..close].parse().ok()?;

        let name = line[..open].trim();
        let hostname = (!name.is_empty() && name != "?").then(|| name.to_string());

        let mac = line[close..]
            .split_whitespace()
            .skip_while(|t| *t != "at")
            .nth(1)
            .and_then(normalize_mac);
        let state = if mac.is_some() {
            if line.contains("permanent") || line.contains("PERM") {
                NeighbourState::Permanent
            } else {
                NeighbourState::Complete
            }
        } else {
            NeighbourState::Incomplete
        };

        Some(NeighbourEntry {
            ip,
            mac,
            state,
            hostname,
        })
    });
    ArpTable::from_entries(entries)
}

/// Read the live neighbour table. Never fails; an unreadable table is empty.
pub async fn read_table() -> ArpTable {
    if let Some(out) = run("ip", &["-4", "neigh", "show"]).await {
        return parse_ip_neigh(&out);
    }
    if let Some(out) = run("arp", &["-an"]).await {
        return parse_arp_a(&out);
    }
    tracing::debug!("No neighbour table source available");
    ArpTable::default()
}

async fn run(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
}

// ── Snapshot cache ────────────────────────────────────────────────

/// Neighbour table snapshot shared by all ARP probes of a pass.
#[derive(Debug, Default)]
pub struct ArpCache {
    snapshot: Mutex<Option<(Instant, ArpTable)>>,
}

impl ArpCache {
    /// Answer from a snapshot no older than `max_age`.
    pub async fn probe(&self, ip: Ipv4Addr, max_age: Duration) -> ProbeOutcome {
        let mut snapshot = self.snapshot.lock().await;
        let fresh = snapshot
            .as_ref()
            .is_some_and(|(taken, _)| taken.elapsed() <= max_age);
        if !fresh {
            *snapshot = Some((Instant::now(), read_table().await));
        }
        match snapshot.as_ref() {
            Some((_, table)) if table.is_live(&ip) => ProbeOutcome::Responded { latency: None },
            _ => ProbeOutcome::NoResponse,
        }
    }

    /// Take a new snapshot unconditionally.
    pub async fn refresh(&self) -> ArpTable {
        let table = read_table().await;
        *self.snapshot.lock().await = Some((Instant::now(), table.clone()));
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IP_NEIGH: &str = "\
192.168.1.1 dev wlan0 lladdr a4:2b:b0:11:22:33 REACHABLE
192.168.1.20 dev wlan0 lladdr b8:27:eb:aa:bb:cc STALE
192.168.1.30 dev wlan0 lladdr 00:0c:29:01:02:03 DELAY
192.168.1.40 dev wlan0  FAILED
192.168.1.50 dev wlan0 lladdr 52:54:00:12:34:56 router PERMANENT
fe80::1 dev wlan0 lladdr a4:2b:b0:11:22:33 router STALE
";

    const ARP_AN: &str = "\
? (10.0.0.1) at 0:11:22:33:44:55 on en0 ifscope [ethernet]
nas.lan (10.0.0.2) at 00:11:32:aa:bb:cc [ether] on eth0
? (10.0.0.3) at (incomplete) on en0 ifscope [ethernet]
? (10.0.0.4) at 08:00:27:de:ad:be on en0 ifscope permanent [ethernet]
";

    #[test]
    fn ip_neigh_states() {
        let table = parse_ip_neigh(IP_NEIGH);
        assert_eq!(table.len(), 5);
        assert!(table.is_live(&Ipv4Addr::new(192, 168, 1, 1)));
        assert!(!table.is_live(&Ipv4Addr::new(192, 168, 1, 20)));
        assert!(table.is_live(&Ipv4Addr::new(192, 168, 1, 30)));
        assert!(!table.is_live(&Ipv4Addr::new(192, 168, 1, 40)));
        assert!(table.is_live(&Ipv4Addr::new(192, 168, 1, 50)));
        assert_eq!(
            table.mac_of(&Ipv4Addr::new(192, 168, 1, 20)),
            Some("B8:27:EB:AA:BB:CC")
        );
        assert_eq!(table.mac_of(&Ipv4Addr::new(192, 168, 1, 40)), None);
    }

    #[test]
    fn arp_an_entries() {
        let table = parse_arp_a(ARP_AN);
        assert_eq!(table.len(), 4);

        let router = table.get(&Ipv4Addr::new(10, 0, 0, 1)).unwrap();
        assert_eq!(router.mac.as_deref(), Some("00:11:22:33:44:55"));
        assert_eq!(router.state, NeighbourState::Complete);
        assert_eq!(router.hostname, None);

        assert_eq!(table.hostname_of(&Ipv4Addr::new(10, 0, 0, 2)), Some("nas.lan"));
        assert!(!table.is_live(&Ipv4Addr::new(10, 0, 0, 3)));
        assert_eq!(
            table.get(&Ipv4Addr::new(10, 0, 0, 4)).unwrap().state,
            NeighbourState::Permanent
        );
    }

    #[test]
    fn garbage_lines_are_ignored() {
        assert!(parse_ip_neigh("nothing useful here\n\n").is_empty());
        assert!(parse_arp_a("Address HWtype HWaddress\n").is_empty());
    }
}
