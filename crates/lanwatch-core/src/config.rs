//! Scan configuration.
//!
//! A [`ScanConfig`] is read once at the start of every pass. It is mutated
//! only through [`ScanConfigPatch`] updates and presets, each of which is
//! validated before it is accepted.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound on the number of ports an auxiliary port scan may touch.
pub const MAX_PORT_SCAN: usize = 4096;

// ── Probe methods ─────────────────────────────────────────────────

/// A probe method as named in configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    Icmp,
    TcpSyn,
    TcpAck,
    Arp,
}

impl MethodKind {
    /// Escalation order used by fallback.
    pub const ALL: [MethodKind; 4] = [Self::Icmp, Self::TcpSyn, Self::TcpAck, Self::Arp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Icmp => "icmp",
            Self::TcpSyn => "tcp_syn",
            Self::TcpAck => "tcp_ack",
            Self::Arp => "arp",
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MethodKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown probe method: {s} (expected icmp, tcp_syn, tcp_ack, arp)"))
    }
}

/// A fully parameterised probe method, ready to run against a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeMethod {
    Icmp,
    TcpSyn(Vec<u16>),
    TcpAck(Vec<u16>),
    Arp,
}

impl ProbeMethod {
    pub fn kind(&self) -> MethodKind {
        match self {
            Self::Icmp => MethodKind::Icmp,
            Self::TcpSyn(_) => MethodKind::TcpSyn,
            Self::TcpAck(_) => MethodKind::TcpAck,
            Self::Arp => MethodKind::Arp,
        }
    }
}

impl fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TcpSyn(ports) | Self::TcpAck(ports) => {
                let list: Vec<String> = ports.iter().map(u16::to_string).collect();
                write!(f, "{}[{}]", self.kind(), list.join(","))
            }
            _ => write!(f, "{}", self.kind()),
        }
    }
}

// ── Scan configuration ────────────────────────────────────────────

/// Process-wide scan parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanConfig {
    /// Explicit subnet, e.g. `192.168.1.0/24`. Takes precedence over auto-detection.
    #[serde(default)]
    pub subnet_cidr: Option<String>,
    #[serde(default = "default_true")]
    pub auto_detect_subnet: bool,
    #[serde(default)]
    pub exclude_ips: Vec<String>,

    /// Probes per second ceiling.
    #[serde(default = "default_scan_rate")]
    pub scan_rate: u32,
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
    /// Per-probe timeout, e.g. `3s`, `1000ms`.
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_true")]
    pub resolve_hostnames: bool,
    #[serde(default = "default_true")]
    pub fetch_vendor_info: bool,
    #[serde(default = "default_true")]
    pub arp_lookup_enabled: bool,
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,

    #[serde(default = "default_ping_methods")]
    pub ping_methods: Vec<MethodKind>,
    #[serde(default = "default_tcp_ping_ports")]
    pub tcp_ping_ports: Vec<u16>,
    #[serde(default = "default_ack_ping_ports")]
    pub ack_ping_ports: Vec<u16>,

    #[serde(default)]
    pub enable_port_scan: bool,
    /// `a-b`, a comma list, or a mix: `22,80,8000-8100`.
    #[serde(default = "default_port_range")]
    pub port_range: String,
}

fn default_true() -> bool {
    true
}

fn default_scan_rate() -> u32 {
    100
}

fn default_max_workers() -> u32 {
    50
}

fn default_scan_timeout() -> String {
    "3s".to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_ping_methods() -> Vec<MethodKind> {
    vec![MethodKind::Icmp]
}

fn default_tcp_ping_ports() -> Vec<u16> {
    vec![22, 80, 443]
}

fn default_ack_ping_ports() -> Vec<u16> {
    vec![80]
}

fn default_port_range() -> String {
    "1-1000".to_string()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Preset::Balanced.config()
    }
}

impl ScanConfig {
    /// Per-probe timeout.
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        parse_timeout(&self.scan_timeout)
    }

    /// Parsed exclusion list. Invalid entries are reported by [`validate`](Self::validate).
    pub fn excluded(&self) -> Result<Vec<Ipv4Addr>, ConfigError> {
        self.exclude_ips
            .iter()
            .map(|raw| {
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidIp(raw.clone()))
            })
            .collect()
    }

    /// Ports for the auxiliary port scan.
    pub fn port_scan_ports(&self) -> Result<Vec<u16>, ConfigError> {
        parse_port_range(&self.port_range)
    }

    /// The parameterised form of a method kind under this configuration.
    pub fn method(&self, kind: MethodKind) -> ProbeMethod {
        match kind {
            MethodKind::Icmp => ProbeMethod::Icmp,
            MethodKind::TcpSyn => ProbeMethod::TcpSyn(self.tcp_ping_ports.clone()),
            MethodKind::TcpAck => ProbeMethod::TcpAck(self.ack_ping_ports.clone()),
            MethodKind::Arp => ProbeMethod::Arp,
        }
    }

    /// Methods tried on every attempt, in escalation order, without duplicates.
    pub fn enabled_methods(&self) -> Vec<ProbeMethod> {
        MethodKind::ALL
            .into_iter()
            .filter(|kind| self.ping_methods.contains(kind))
            .map(|kind| self.method(kind))
            .collect()
    }

    /// Whether a method has everything it needs to run.
    pub fn is_configured(&self, kind: MethodKind) -> bool {
        match kind {
            MethodKind::Icmp => true,
            MethodKind::TcpSyn => !self.tcp_ping_ports.is_empty(),
            MethodKind::TcpAck => !self.ack_ping_ports.is_empty(),
            MethodKind::Arp => self.arp_lookup_enabled || self.ping_methods.contains(&kind),
        }
    }

    /// Configured methods not in the enabled set, in escalation order.
    /// Empty when fallback is disabled.
    pub fn fallback_methods(&self) -> Vec<ProbeMethod> {
        if !self.fallback_enabled {
            return Vec::new();
        }
        MethodKind::ALL
            .into_iter()
            .filter(|kind| !self.ping_methods.contains(kind) && self.is_configured(*kind))
            .map(|kind| self.method(kind))
            .collect()
    }

    /// Copy of this configuration with the enabled method set replaced.
    pub fn with_methods(&self, kinds: &[MethodKind]) -> Self {
        Self {
            ping_methods: kinds.to_vec(),
            ..self.clone()
        }
    }

    /// Copy of this configuration with a preset's tuning applied. The
    /// network section (subnet, auto-detect, exclusions) is kept.
    pub fn with_preset(&self, preset: Preset) -> Self {
        Self {
            subnet_cidr: self.subnet_cidr.clone(),
            auto_detect_subnet: self.auto_detect_subnet,
            exclude_ips: self.exclude_ips.clone(),
            ..preset.config()
        }
    }

    /// Apply a partial update. Does not validate.
    pub fn apply(&mut self, patch: &ScanConfigPatch) {
        if let Some(cidr) = &patch.subnet_cidr {
            let cidr = cidr.trim();
            self.subnet_cidr = (!cidr.is_empty()).then(|| cidr.to_string());
        }
        macro_rules! set {
            ($target:ident, $source:ident; $($field:ident),*) => {
                $(if let Some(v) = &$source.$field { $target.$field = v.clone(); })*
            };
        }
        let target = self;
        set!(
            target, patch;
            auto_detect_subnet,
            exclude_ips,
            scan_rate,
            max_workers,
            scan_timeout,
            max_retries,
            resolve_hostnames,
            fetch_vendor_info,
            arp_lookup_enabled,
            fallback_enabled,
            ping_methods,
            tcp_ping_ports,
            ack_ping_ports,
            enable_port_scan,
            port_range
        );
    }

    /// Every violation in this configuration. Empty means valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        match self.subnet_cidr.as_deref().map(str::trim) {
            Some(cidr) if !cidr.is_empty() => {
                if cidr.parse::<Ipv4Net>().is_err() {
                    errors.push(ConfigError::InvalidCidr(cidr.to_string()));
                }
            }
            _ if !self.auto_detect_subnet => errors.push(ConfigError::MissingSubnet),
            _ => {}
        }

        for raw in &self.exclude_ips {
            if raw.trim().parse::<Ipv4Addr>().is_err() {
                errors.push(ConfigError::InvalidIp(raw.clone()));
            }
        }

        check_range(&mut errors, "scan_rate", self.scan_rate, 1, 1000);
        check_range(&mut errors, "max_workers", self.max_workers, 1, 200);
        check_range(&mut errors, "max_retries", self.max_retries, 0, 5);

        if let Err(e) = self.timeout() {
            errors.push(e);
        }

        if self.ping_methods.is_empty() {
            errors.push(ConfigError::NoProbeMethods);
        }
        if self.ping_methods.contains(&MethodKind::TcpSyn) && self.tcp_ping_ports.is_empty() {
            errors.push(ConfigError::MissingPorts(MethodKind::TcpSyn));
        }
        if self.ping_methods.contains(&MethodKind::TcpAck) && self.ack_ping_ports.is_empty() {
            errors.push(ConfigError::MissingPorts(MethodKind::TcpAck));
        }

        for port in self.tcp_ping_ports.iter().chain(&self.ack_ping_ports) {
            if *port == 0 {
                errors.push(ConfigError::InvalidPort(0));
            }
        }

        if let Err(e) = self.port_scan_ports() {
            errors.push(e);
        }

        errors
    }

    /// First violation, if any.
    pub fn check(&self) -> Result<(), ConfigError> {
        match self.validate().into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn check_range(errors: &mut Vec<ConfigError>, field: &'static str, value: u32, min: u32, max: u32) {
    if !(min..=max).contains(&value) {
        errors.push(ConfigError::OutOfRange {
            field,
            value: value.into(),
            min: min.into(),
            max: max.into(),
        });
    }
}

/// A partial [`ScanConfig`]. Absent fields are left unchanged; an empty
/// `subnet_cidr` clears the explicit subnet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScanConfigPatch {
    pub subnet_cidr: Option<String>,
    pub auto_detect_subnet: Option<bool>,
    pub exclude_ips: Option<Vec<String>>,
    pub scan_rate: Option<u32>,
    pub max_workers: Option<u32>,
    pub scan_timeout: Option<String>,
    pub max_retries: Option<u32>,
    pub resolve_hostnames: Option<bool>,
    pub fetch_vendor_info: Option<bool>,
    pub arp_lookup_enabled: Option<bool>,
    pub fallback_enabled: Option<bool>,
    pub ping_methods: Option<Vec<MethodKind>>,
    pub tcp_ping_ports: Option<Vec<u16>>,
    pub ack_ping_ports: Option<Vec<u16>>,
    pub enable_port_scan: Option<bool>,
    pub port_range: Option<String>,
}

/// Outcome of validating a candidate configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn from_errors(errors: &[ConfigError]) -> Self {
        Self {
            valid: errors.is_empty(),
            errors: errors.iter().map(ToString::to_string).collect(),
        }
    }
}

// ── Parsing helpers ───────────────────────────────────────────────

/// Parse a timeout such as `3s`, `1000ms`, `1.5m`, or a bare number of seconds.
pub fn parse_timeout(raw: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidTimeout(raw.to_string());
    let trimmed = raw.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let mut parts = number.split('.');
    let well_formed = parts.clone().count() <= 2
        && parts.all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if !well_formed {
        return Err(invalid());
    }

    let value: f64 = number.parse().map_err(|_| invalid())?;
    let secs = match unit {
        "" | "s" => value,
        "ms" => value / 1000.0,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return Err(invalid()),
    };
    if secs <= 0.0 {
        return Err(invalid());
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Expand a port specification into a sorted, de-duplicated port list.
pub fn parse_port_range(raw: &str) -> Result<Vec<u16>, ConfigError> {
    let invalid = || ConfigError::InvalidPortRange(raw.to_string());
    let parse_port = |s: &str| -> Result<u16, ConfigError> {
        let value: u32 = s.trim().parse().map_err(|_| invalid())?;
        match u16::try_from(value) {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(ConfigError::InvalidPort(value)),
        }
    };

    let mut ports = Vec::new();
    for item in raw.split(',').map(str::trim) {
        if item.is_empty() {
            return Err(invalid());
        }
        match item.split_once('-') {
            Some((lo, hi)) => {
                let (lo, hi) = (parse_port(lo)?, parse_port(hi)?);
                if lo > hi {
                    return Err(invalid());
                }
                ports.extend(lo..=hi);
            }
            None => ports.push(parse_port(item)?),
        }
        if ports.len() > MAX_PORT_SCAN {
            return Err(invalid());
        }
    }

    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

// ── Presets ───────────────────────────────────────────────────────

/// Named parameter sets trading speed against accuracy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Fast,
    Balanced,
    Thorough,
    Stealth,
}

/// Listing entry for a preset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresetInfo {
    pub name: String,
    pub display_name: String,
    pub description: String,
}

impl Preset {
    pub const ALL: [Preset; 4] = [Self::Fast, Self::Balanced, Self::Thorough, Self::Stealth];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::Thorough => "thorough",
            Self::Stealth => "stealth",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Fast => "Fast",
            Self::Balanced => "Balanced",
            Self::Thorough => "Thorough",
            Self::Stealth => "Stealth",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Fast => "Quick sweep for finding devices; ICMP only, no name resolution",
            Self::Balanced => "Balance of speed and accuracy; suitable for most home networks",
            Self::Thorough => "Maximum accuracy; ICMP plus TCP SYN and ACK probes on common ports",
            Self::Stealth => "Low probe rate and TCP only to minimise network impact",
        }
    }

    pub fn info(&self) -> PresetInfo {
        PresetInfo {
            name: self.name().to_string(),
            display_name: self.display_name().to_string(),
            description: self.description().to_string(),
        }
    }

    pub fn config(&self) -> ScanConfig {
        let base = ScanConfig {
            subnet_cidr: None,
            auto_detect_subnet: true,
            exclude_ips: Vec::new(),
            scan_rate: 100,
            max_workers: 50,
            scan_timeout: "3s".to_string(),
            max_retries: 2,
            resolve_hostnames: true,
            fetch_vendor_info: true,
            arp_lookup_enabled: true,
            fallback_enabled: true,
            ping_methods: vec![MethodKind::Icmp],
            tcp_ping_ports: vec![22, 80, 443],
            ack_ping_ports: vec![80],
            enable_port_scan: false,
            port_range: "1-1000".to_string(),
        };
        match self {
            Self::Fast => ScanConfig {
                scan_rate: 300,
                max_workers: 100,
                scan_timeout: "1s".to_string(),
                max_retries: 1,
                resolve_hostnames: false,
                fetch_vendor_info: false,
                tcp_ping_ports: vec![80],
                ack_ping_ports: Vec::new(),
                ..base
            },
            Self::Balanced => base,
            Self::Thorough => ScanConfig {
                scan_rate: 50,
                max_workers: 30,
                scan_timeout: "5s".to_string(),
                max_retries: 3,
                ping_methods: vec![MethodKind::Icmp, MethodKind::TcpSyn, MethodKind::TcpAck],
                tcp_ping_ports: vec![22, 23, 25, 53, 80, 110, 443, 993, 995],
                ack_ping_ports: vec![80, 443],
                ..base
            },
            Self::Stealth => ScanConfig {
                scan_rate: 10,
                max_workers: 10,
                scan_timeout: "10s".to_string(),
                max_retries: 1,
                resolve_hostnames: false,
                ping_methods: vec![MethodKind::TcpSyn],
                tcp_ping_ports: vec![80, 443],
                ack_ping_ports: Vec::new(),
                ..base
            },
        }
    }
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownPreset(s.to_string()))
    }
}
