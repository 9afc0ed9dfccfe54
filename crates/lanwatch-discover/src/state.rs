//! Device table and the per-pass state machine.
//!
//! Devices live in one arena with two indexes over it: hardware address
//! (primary identity) and IP address (fallback for hosts whose MAC is not
//! known). Applying a pass yields the changed devices, one scan record per
//! considered device, and the presence events to publish.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use lanwatch_core::events::EventPayload;
use lanwatch_core::types::{Device, DeviceId, ScanRecord};

use crate::aggregate::Observation;

/// Known devices with MAC-first, IP-second lookup.
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: Vec<Device>,
    by_mac: HashMap<String, usize>,
    by_ip: HashMap<Ipv4Addr, usize>,
}

impl DeviceTable {
    pub fn new(devices: Vec<Device>) -> Self {
        let mut table = Self::default();
        for device in devices {
            table.insert(device);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn get(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == *id)
    }

    /// Slot for an observation: by MAC when it carries one, else by IP.
    ///
    /// A MAC lookup that misses still falls through to IP only when the
    /// device found there has no MAC of its own; a device with a different
    /// MAC at the same IP is a different device.
    fn resolve(&self, mac: Option<&str>, ip: Ipv4Addr) -> Option<usize> {
        if let Some(slot) = mac.and_then(|m| self.by_mac.get(m)) {
            return Some(*slot);
        }
        let slot = *self.by_ip.get(&ip)?;
        match (mac, self.devices[slot].mac.as_deref()) {
            (Some(_), Some(_)) => None,
            _ => Some(slot),
        }
    }

    fn insert(&mut self, device: Device) -> usize {
        let slot = self.devices.len();
        if let Some(mac) = &device.mac {
            self.by_mac.insert(mac.clone(), slot);
        }
        self.by_ip.insert(device.ip, slot);
        self.devices.push(device);
        slot
    }

    /// Re-point the IP index after a device moved address.
    fn move_ip(&mut self, slot: usize, ip: Ipv4Addr) {
        let old = self.devices[slot].ip;
        if old == ip {
            return;
        }
        if self.by_ip.get(&old) == Some(&slot) {
            self.by_ip.remove(&old);
        }
        self.by_ip.insert(ip, slot);
        self.devices[slot].ip = ip;
    }

    fn learn_mac(&mut self, slot: usize, mac: &str) {
        if self.devices[slot].mac.is_none() {
            self.devices[slot].mac = Some(mac.to_string());
            self.by_mac.insert(mac.to_string(), slot);
        }
    }
}

/// Everything one device contributes to the outcome of a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// The device after the pass.
    pub device: Device,
    pub record: ScanRecord,
    pub event: Option<EventPayload>,
}

/// Fold one pass worth of observations into the table.
///
/// Online observations are applied first, so a device that moved to a new
/// IP is not also marked offline at its old one. Each device gets at most
/// one transition. Offline observations only touch known devices; an
/// unknown host that did not answer creates nothing.
pub fn apply_pass(
    table: &mut DeviceTable,
    observations: &[Observation],
    at: DateTime<Utc>,
) -> Vec<Transition> {
    let mut touched: HashSet<usize> = HashSet::new();
    let mut transitions = Vec::new();

    for obs in observations.iter().filter(|o| o.online) {
        let (slot, event) = match table.resolve(obs.mac.as_deref(), obs.ip) {
            Some(slot) => {
                if touched.contains(&slot) {
                    tracing::warn!(ip = %obs.ip, "Duplicate observation for device in one pass");
                    continue;
                }
                let was_online = table.devices[slot].is_online;
                table.move_ip(slot, obs.ip);
                if let Some(mac) = &obs.mac {
                    table.learn_mac(slot, mac);
                }
                let device = &mut table.devices[slot];
                device.is_online = true;
                device.last_seen = device.last_seen.max(at);
                let event = (!was_online).then(|| EventPayload::DeviceOnline {
                    device_id: device.id,
                    ip: device.ip,
                });
                (slot, event)
            }
            None => {
                let mut device = Device::discovered(obs.ip, obs.mac.clone(), at);
                // An IP-keyed id can be taken by a device that has since moved.
                if table.get(&device.id).is_some() {
                    device.id = DeviceId(Uuid::new_v4());
                }
                let event = EventPayload::DeviceDiscovered {
                    device_id: device.id,
                    ip: device.ip,
                    mac: device.mac.clone(),
                };
                (table.insert(device), Some(event))
            }
        };

        enrich(&mut table.devices[slot], obs);
        touched.insert(slot);
        transitions.push(Transition {
            device: table.devices[slot].clone(),
            record: ScanRecord {
                device_id: table.devices[slot].id,
                scan_time: at,
                is_online: true,
                response_time: obs.response_time_ms,
            },
            event,
        });
    }

    for obs in observations.iter().filter(|o| !o.online) {
        let Some(&slot) = table.by_ip.get(&obs.ip) else {
            continue;
        };
        if !touched.insert(slot) {
            continue;
        }
        let device = &mut table.devices[slot];
        let event = device.is_online.then(|| EventPayload::DeviceOffline {
            device_id: device.id,
            ip: device.ip,
            last_seen: device.last_seen,
        });
        device.is_online = false;
        transitions.push(Transition {
            device: device.clone(),
            record: ScanRecord {
                device_id: device.id,
                scan_time: at,
                is_online: false,
                response_time: None,
            },
            event,
        });
    }

    transitions
}

/// Fill attributes learned this pass. Nothing is ever cleared: a failed
/// lookup leaves the previous value in place.
fn enrich(device: &mut Device, obs: &Observation) {
    if let Some(hostname) = &obs.hostname {
        device.hostname = Some(hostname.clone());
    }
    if let Some(vendor) = &obs.vendor {
        device.vendor = Some(vendor.clone());
    }
    if let Some(device_type) = &obs.device_type {
        device.device_type = Some(device_type.clone());
    }
    if let Some(ports) = &obs.open_ports {
        device.set_open_ports(ports);
    }
}
