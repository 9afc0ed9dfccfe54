//! lanwatch-store: Persistence for devices, scan records, and scan sessions.
//!
//! The [`Store`] trait is the only resource shared across scan passes. Two
//! backends are provided:
//! - [`MemoryStore`]: in-process, for tests and ephemeral runs
//! - [`JsonFileStore`]: JSON documents under a data directory, with the
//!   scan record history kept as an append-only JSON Lines file

pub mod file;
pub mod memory;
mod state;

use chrono::{DateTime, Duration, Utc};

use lanwatch_core::config::ScanConfig;
use lanwatch_core::types::{
    Device, DeviceId, NetworkStats, ScanRecord, ScanSession, ScanType, SessionId,
    SessionOutcome, TimeRange,
};

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Scan session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Scan session already closed: {0}")]
    SessionClosed(SessionId),

    #[error("Data directory is in use by another process: {0}")]
    Locked(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// What a retention pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub records: usize,
    pub sessions: usize,
}

/// Trait for presence persistence backends.
///
/// Every write is atomic per record. Callers never run two scan passes at
/// once, so no cross-record transactions are offered.
pub trait Store: Send + Sync {
    /// Insert or replace a device by id.
    fn upsert_device(&self, device: &Device) -> Result<()>;

    fn get_device(&self, id: &DeviceId) -> Result<Option<Device>>;

    /// All devices, ordered by IP address.
    fn query_devices(&self) -> Result<Vec<Device>>;

    /// Append one immutable scan verdict.
    fn append_scan_record(&self, record: &ScanRecord) -> Result<()>;

    /// Records for one device with `scan_time` in `range`, oldest first.
    fn query_records(&self, device_id: &DeviceId, range: &TimeRange) -> Result<Vec<ScanRecord>>;

    /// Open a session for a pass starting now.
    fn open_session(&self, subnet: &str, scan_type: ScanType) -> Result<SessionId>;

    /// Close an open session. Closing twice is an error.
    fn close_session(
        &self,
        id: &SessionId,
        devices_found: u32,
        outcome: SessionOutcome,
    ) -> Result<()>;

    /// Most recent sessions first.
    fn list_sessions(&self, limit: usize) -> Result<Vec<ScanSession>>;

    fn load_scan_config(&self) -> Result<Option<ScanConfig>>;

    fn save_scan_config(&self, config: &ScanConfig) -> Result<()>;

    /// Remove records and sessions that started before `cutoff`, including
    /// sessions left open by a crashed process. Callers never prune while a
    /// pass is running.
    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<PruneStats>;

    // ── Derived operations ────────────────────────────────────────

    /// The latest record strictly before `before`, if any.
    fn last_record_before(
        &self,
        device_id: &DeviceId,
        before: DateTime<Utc>,
    ) -> Result<Option<ScanRecord>> {
        let range = TimeRange::new(DateTime::<Utc>::MIN_UTC, before);
        Ok(self.query_records(device_id, &range)?.pop())
    }

    /// Devices whose ip, MAC, hostname, alias, or vendor contains `query`.
    fn search_devices(&self, query: &str) -> Result<Vec<Device>> {
        Ok(self
            .query_devices()?
            .into_iter()
            .filter(|d| d.matches(query))
            .collect())
    }

    /// Set or clear (empty or `None`) a device's alias.
    fn set_custom_name(&self, id: &DeviceId, name: Option<&str>) -> Result<Device> {
        let mut device = self
            .get_device(id)?
            .ok_or_else(|| StoreError::DeviceNotFound(id.to_string()))?;
        device.custom_name = clean_alias(name);
        self.upsert_device(&device)?;
        Ok(device)
    }

    /// Set or clear a device's alias, addressing it by hardware address.
    fn set_custom_name_by_mac(&self, mac: &str, name: Option<&str>) -> Result<Device> {
        let wanted = lanwatch_core::types::normalize_mac(mac)
            .ok_or_else(|| StoreError::DeviceNotFound(mac.to_string()))?;
        let mut device = self
            .query_devices()?
            .into_iter()
            .find(|d| d.mac.as_deref() == Some(wanted.as_str()))
            .ok_or_else(|| StoreError::DeviceNotFound(mac.to_string()))?;
        device.custom_name = clean_alias(name);
        self.upsert_device(&device)?;
        Ok(device)
    }

    /// Device counts plus the number of passes started in the last 24 hours.
    fn stats(&self, now: DateTime<Utc>) -> Result<NetworkStats> {
        let devices = self.query_devices()?;
        let online = devices.iter().filter(|d| d.is_online).count() as u32;
        let since = now - Duration::hours(24);
        let recent_scans = self
            .list_sessions(usize::MAX)?
            .iter()
            .filter(|s| s.start_time >= since)
            .count() as u32;
        Ok(NetworkStats {
            total_devices: devices.len() as u32,
            online_devices: online,
            offline_devices: devices.len() as u32 - online,
            recent_scans,
        })
    }
}

fn clean_alias(name: Option<&str>) -> Option<String> {
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}
