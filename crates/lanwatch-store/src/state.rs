//! In-memory tables shared by both backends.
//!
//! Table edits are free functions over plain vectors so the file backend
//! can stage a change on a copy and commit it only after the write lands.

use chrono::{DateTime, Utc};

use lanwatch_core::config::ScanConfig;
use lanwatch_core::types::{
    Device, DeviceId, ScanRecord, ScanSession, ScanType, SessionId, SessionOutcome, TimeRange,
};

use crate::{PruneStats, Result, StoreError};

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub devices: Vec<Device>,
    pub records: Vec<ScanRecord>,
    pub sessions: Vec<ScanSession>,
    pub config: Option<ScanConfig>,
}

impl StoreState {
    pub fn upsert_device(&mut self, device: &Device) {
        upsert_device(&mut self.devices, device);
    }

    pub fn get_device(&self, id: &DeviceId) -> Option<Device> {
        self.devices.iter().find(|d| d.id == *id).cloned()
    }

    pub fn devices_by_ip(&self) -> Vec<Device> {
        let mut devices = self.devices.clone();
        devices.sort_by_key(|d| d.ip);
        devices
    }

    /// Insert keeping `records` ordered by scan time.
    pub fn append_record(&mut self, record: &ScanRecord) {
        let at = self
            .records
            .partition_point(|r| r.scan_time <= record.scan_time);
        self.records.insert(at, record.clone());
    }

    pub fn records_in(&self, device_id: &DeviceId, range: &TimeRange) -> Vec<ScanRecord> {
        let start = self.records.partition_point(|r| r.scan_time < range.start);
        self.records[start..]
            .iter()
            .take_while(|r| r.scan_time < range.end)
            .filter(|r| r.device_id == *device_id)
            .cloned()
            .collect()
    }

    pub fn open_session(&mut self, subnet: &str, scan_type: ScanType) -> SessionId {
        open_session(&mut self.sessions, subnet, scan_type)
    }

    pub fn close_session(
        &mut self,
        id: &SessionId,
        devices_found: u32,
        outcome: SessionOutcome,
    ) -> Result<()> {
        close_session(&mut self.sessions, id, devices_found, outcome)
    }

    pub fn recent_sessions(&self, limit: usize) -> Vec<ScanSession> {
        let mut sessions = self.sessions.clone();
        // Later insertions win ties on start time.
        sessions.reverse();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        sessions.truncate(limit);
        sessions
    }

    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> PruneStats {
        PruneStats {
            records: prune_records(&mut self.records, cutoff),
            sessions: prune_sessions(&mut self.sessions, cutoff),
        }
    }
}

// ── Table edits ───────────────────────────────────────────────────

pub(crate) fn upsert_device(devices: &mut Vec<Device>, device: &Device) {
    match devices.iter_mut().find(|d| d.id == device.id) {
        Some(existing) => *existing = device.clone(),
        None => devices.push(device.clone()),
    }
}

pub(crate) fn open_session(
    sessions: &mut Vec<ScanSession>,
    subnet: &str,
    scan_type: ScanType,
) -> SessionId {
    let id = SessionId::new();
    sessions.push(ScanSession {
        id,
        start_time: Utc::now(),
        end_time: None,
        subnet: subnet.to_string(),
        scan_type,
        devices_found: 0,
        outcome: None,
    });
    id
}

pub(crate) fn close_session(
    sessions: &mut [ScanSession],
    id: &SessionId,
    devices_found: u32,
    outcome: SessionOutcome,
) -> Result<()> {
    let session = sessions
        .iter_mut()
        .find(|s| s.id == *id)
        .ok_or(StoreError::SessionNotFound(*id))?;
    if session.end_time.is_some() {
        return Err(StoreError::SessionClosed(*id));
    }
    session.end_time = Some(Utc::now());
    session.devices_found = devices_found;
    session.outcome = Some(outcome);
    Ok(())
}

pub(crate) fn prune_records(records: &mut Vec<ScanRecord>, cutoff: DateTime<Utc>) -> usize {
    let before = records.len();
    records.retain(|r| r.scan_time >= cutoff);
    before - records.len()
}

/// Sessions are aged by start time. An open session that started before the
/// cutoff was left behind by a crashed process and goes too.
pub(crate) fn prune_sessions(sessions: &mut Vec<ScanSession>, cutoff: DateTime<Utc>) -> usize {
    let before = sessions.len();
    sessions.retain(|s| s.start_time >= cutoff);
    before - sessions.len()
}
