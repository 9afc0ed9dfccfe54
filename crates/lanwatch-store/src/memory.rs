//! In-process store.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use lanwatch_core::config::ScanConfig;
use lanwatch_core::types::{
    Device, DeviceId, ScanRecord, ScanSession, ScanType, SessionId, SessionOutcome, TimeRange,
};

use crate::state::StoreState;
use crate::{PruneStats, Result, Store, StoreError};

/// A store that keeps everything in memory for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }
}

impl Store for MemoryStore {
    fn upsert_device(&self, device: &Device) -> Result<()> {
        self.lock()?.upsert_device(device);
        Ok(())
    }

    fn get_device(&self, id: &DeviceId) -> Result<Option<Device>> {
        Ok(self.lock()?.get_device(id))
    }

    fn query_devices(&self) -> Result<Vec<Device>> {
        Ok(self.lock()?.devices_by_ip())
    }

    fn append_scan_record(&self, record: &ScanRecord) -> Result<()> {
        self.lock()?.append_record(record);
        Ok(())
    }

    fn query_records(&self, device_id: &DeviceId, range: &TimeRange) -> Result<Vec<ScanRecord>> {
        Ok(self.lock()?.records_in(device_id, range))
    }

    fn open_session(&self, subnet: &str, scan_type: ScanType) -> Result<SessionId> {
        Ok(self.lock()?.open_session(subnet, scan_type))
    }

    fn close_session(
        &self,
        id: &SessionId,
        devices_found: u32,
        outcome: SessionOutcome,
    ) -> Result<()> {
        self.lock()?.close_session(id, devices_found, outcome)
    }

    fn list_sessions(&self, limit: usize) -> Result<Vec<ScanSession>> {
        Ok(self.lock()?.recent_sessions(limit))
    }

    fn load_scan_config(&self) -> Result<Option<ScanConfig>> {
        Ok(self.lock()?.config.clone())
    }

    fn save_scan_config(&self, config: &ScanConfig) -> Result<()> {
        self.lock()?.config = Some(config.clone());
        Ok(())
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<PruneStats> {
        Ok(self.lock()?.prune_before(cutoff))
    }
}
