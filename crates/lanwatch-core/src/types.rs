//! Core domain types for LAN Watch.
//!
//! Devices, the append-only scan record history, scan sessions, and the
//! derived presence timelines shared by the store and the discovery engine.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace UUID for deterministic device IDs.
const LANWATCH_NS: Uuid = Uuid::from_bytes([
    0x3f, 0x1c, 0x52, 0x8e, 0x47, 0x0b, 0x4d, 0x6a, 0x9e, 0x21, 0x7c, 0x44, 0xd0, 0x5b, 0x18, 0xa3,
]);

// ── Timestamps ────────────────────────────────────────────────────

/// Persisted timestamp layout: ISO-8601, UTC, no offset suffix.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Parse a persisted timestamp. Offset-less values are UTC; values carrying
/// an offset (or `Z`) are converted.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Format a timestamp for persistence.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// Serde adapter for `DateTime<Utc>` using [`TIMESTAMP_FORMAT`].
pub mod utc_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
    }
}

/// Serde adapter for `Option<DateTime<Utc>>` using [`TIMESTAMP_FORMAT`].
pub mod utc_timestamp_opt {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => s.serialize_some(&super::format_timestamp(dt)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(raw) => super::parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}"))),
            None => Ok(None),
        }
    }
}

/// A half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        *t >= self.start && *t < self.end
    }
}

// ── Hardware addresses ────────────────────────────────────────────

/// Normalize a MAC address to `AA:BB:CC:DD:EE:FF`.
///
/// Accepts colon, dash, or dot separators and bare 12-digit hex. Single-digit
/// octets (as printed by BSD `arp`) are zero-padded.
pub fn normalize_mac(mac: &str) -> Option<String> {
    let cleaned = mac.trim().replace(['-', '.'], ":");
    let octets: Vec<String> = if cleaned.contains(':') {
        cleaned.split(':').map(|p| format!("{p:0>2}")).collect()
    } else if cleaned.len() == 12 {
        cleaned
            .as_bytes()
            .chunks(2)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect()
    } else {
        return None;
    };

    if octets.len() != 6
        || !octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
    {
        return None;
    }
    Some(octets.join(":").to_uppercase())
}

// ── Devices ───────────────────────────────────────────────────────

/// Stable identifier of a tracked device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    /// Deterministic ID derived from the identity key at first discovery.
    pub fn from_identity(key: &IdentityKey) -> Self {
        Self(Uuid::new_v5(&LANWATCH_NS, key.to_string().as_bytes()))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The key a device is recognised by: hardware address when known, else IP.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    Mac(String),
    Ip(Ipv4Addr),
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mac(mac) => write!(f, "mac:{mac}"),
            Self::Ip(ip) => write!(f, "ip:{ip}"),
        }
    }
}

/// A host on the local network and its current presence state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub ip: Ipv4Addr,
    pub mac: Option<String>,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
    /// User-assigned alias.
    pub custom_name: Option<String>,
    /// Inferred from vendor and open ports.
    pub device_type: Option<String>,
    /// Open TCP ports as a JSON array string, e.g. `"[22,80]"`.
    pub open_ports: Option<String>,
    #[serde(with = "utc_timestamp")]
    pub first_seen: DateTime<Utc>,
    #[serde(with = "utc_timestamp")]
    pub last_seen: DateTime<Utc>,
    pub is_online: bool,
}

impl Device {
    /// A device found online for the first time.
    pub fn discovered(ip: Ipv4Addr, mac: Option<String>, at: DateTime<Utc>) -> Self {
        let key = match &mac {
            Some(mac) => IdentityKey::Mac(mac.clone()),
            None => IdentityKey::Ip(ip),
        };
        Self {
            id: DeviceId::from_identity(&key),
            ip,
            mac,
            hostname: None,
            vendor: None,
            custom_name: None,
            device_type: None,
            open_ports: None,
            first_seen: at,
            last_seen: at,
            is_online: true,
        }
    }

    pub fn identity_key(&self) -> IdentityKey {
        match &self.mac {
            Some(mac) => IdentityKey::Mac(mac.clone()),
            None => IdentityKey::Ip(self.ip),
        }
    }

    /// Alias, then hostname, then IP.
    pub fn display_name(&self) -> String {
        self.custom_name
            .clone()
            .or_else(|| self.hostname.clone())
            .unwrap_or_else(|| self.ip.to_string())
    }

    pub fn open_port_list(&self) -> Vec<u16> {
        self.open_ports
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    pub fn set_open_ports(&mut self, ports: &[u16]) {
        let mut sorted = ports.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        self.open_ports = serde_json::to_string(&sorted).ok();
    }

    /// Case-insensitive substring match over the searchable attributes.
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        let ip = self.ip.to_string();
        let hit = [
            Some(ip.as_str()),
            self.mac.as_deref(),
            self.hostname.as_deref(),
            self.custom_name.as_deref(),
            self.vendor.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&needle));
        hit
    }
}

/// One device's verdict in one completed scan pass. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanRecord {
    pub device_id: DeviceId,
    #[serde(with = "utc_timestamp")]
    pub scan_time: DateTime<Utc>,
    pub is_online: bool,
    /// Round-trip time in milliseconds.
    pub response_time: Option<u32>,
}

// ── Sessions ──────────────────────────────────────────────────────

/// Unique identifier of a scan session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What started a scan pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Manual,
    Scheduled,
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("manual"),
            Self::Scheduled => f.write_str("scheduled"),
        }
    }
}

/// How a closed session ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionOutcome {
    Completed,
    Aborted,
    Failed,
}

/// One full sweep over the resolved subnet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanSession {
    pub id: SessionId,
    #[serde(with = "utc_timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "utc_timestamp_opt", default)]
    pub end_time: Option<DateTime<Utc>>,
    pub subnet: String,
    pub scan_type: ScanType,
    pub devices_found: u32,
    #[serde(default)]
    pub outcome: Option<SessionOutcome>,
}

/// Reader-side view of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Aborted,
    Failed,
    /// Never closed and not the active pass: the process died mid-scan.
    Stale,
}

impl ScanSession {
    /// Derive the status given the id of the pass currently running in
    /// this process, if any.
    pub fn status(&self, active: Option<&SessionId>) -> SessionStatus {
        match (self.end_time, self.outcome) {
            (None, _) if active == Some(&self.id) => SessionStatus::Running,
            (None, _) => SessionStatus::Stale,
            (Some(_), Some(SessionOutcome::Aborted)) => SessionStatus::Aborted,
            (Some(_), Some(SessionOutcome::Failed)) => SessionStatus::Failed,
            (Some(_), _) => SessionStatus::Completed,
        }
    }
}

// ── Timelines ─────────────────────────────────────────────────────

/// A contiguous interval during which a device was reachable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OnlinePeriod {
    #[serde(with = "utc_timestamp")]
    pub start_time: DateTime<Utc>,
    /// `None` = online through the end of the window (or still online).
    #[serde(with = "utc_timestamp_opt")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Per-device presence for one calendar day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceTimeline {
    pub device_id: DeviceId,
    pub device_name: String,
    pub ip_address: String,
    pub online_periods: Vec<OnlinePeriod>,
}

/// Presence of every known device for one calendar day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayTimeline {
    pub date: NaiveDate,
    pub devices: Vec<DeviceTimeline>,
}

// ── Reports ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Error,
}

/// Summary of one scan pass as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanReport {
    pub status: ReportStatus,
    pub subnet: Option<String>,
    pub devices_found: u32,
    pub scan_type: ScanType,
    /// Wall-clock duration in seconds.
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ScanReport {
    pub fn error(scan_type: ScanType, subnet: Option<String>, message: impl Into<String>) -> Self {
        Self {
            status: ReportStatus::Error,
            subnet,
            devices_found: 0,
            scan_type,
            duration: 0.0,
            session_id: None,
            message: Some(message.into()),
        }
    }
}

/// Device counts and recent activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkStats {
    pub total_devices: u32,
    pub online_devices: u32,
    pub offline_devices: u32,
    pub recent_scans: u32,
}
