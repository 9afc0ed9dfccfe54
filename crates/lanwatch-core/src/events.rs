//! Presence events.
//!
//! Emitted by the device state machine and the scan engine on every state
//! transition and at pass boundaries, for subscribers on a broadcast channel.

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{DeviceId, ScanType, SessionId, SessionOutcome};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// An event emitted by the discovery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanwatchEvent {
    pub id: EventId,
    #[serde(with = "crate::types::utc_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl LanwatchEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// The event payload, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type")]
pub enum EventPayload {
    // ── Device transitions ────────────────────────────────────
    /// A host was seen for the first time.
    DeviceDiscovered {
        device_id: DeviceId,
        ip: Ipv4Addr,
        mac: Option<String>,
    },
    /// A known device went from offline to online.
    DeviceOnline { device_id: DeviceId, ip: Ipv4Addr },
    /// A known device went from online to offline.
    DeviceOffline {
        device_id: DeviceId,
        ip: Ipv4Addr,
        #[serde(with = "crate::types::utc_timestamp")]
        last_seen: DateTime<Utc>,
    },

    // ── Scan lifecycle ────────────────────────────────────────
    ScanStarted {
        session_id: SessionId,
        scan_type: ScanType,
        subnet: String,
        candidates: u32,
    },
    ScanCompleted {
        session_id: SessionId,
        outcome: SessionOutcome,
        devices_found: u32,
        duration_ms: u64,
    },
}
