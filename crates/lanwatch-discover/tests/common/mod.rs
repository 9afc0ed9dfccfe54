//! Shared fixtures: a scripted network and a store that can be made to fail.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use lanwatch_core::config::{MethodKind, ProbeMethod, ScanConfig, ScanConfigPatch};
use lanwatch_core::types::{
    Device, DeviceId, ScanRecord, ScanSession, ScanType, SessionId, SessionOutcome, TimeRange,
};
use lanwatch_discover::probe::{ArpTable, Network, NeighbourEntry, NeighbourState, ProbeOutcome};
use lanwatch_discover::vendor::VendorCache;
use lanwatch_discover::ScanEngine;
use lanwatch_store::memory::MemoryStore;
use lanwatch_store::{PruneStats, Store, StoreError};

pub fn ip(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

pub fn hit(ms: u64) -> ProbeOutcome {
    ProbeOutcome::Responded {
        latency: Some(Duration::from_millis(ms)),
    }
}

#[derive(Debug, Clone, Default)]
struct FakeHost {
    mac: Option<String>,
    /// Per method, answers consumed in order; the last one repeats.
    answers: HashMap<MethodKind, Vec<ProbeOutcome>>,
}

/// A network whose hosts answer exactly as scripted.
#[derive(Default)]
pub struct FakeNetwork {
    hosts: Mutex<HashMap<Ipv4Addr, FakeHost>>,
    calls: Mutex<Vec<(Ipv4Addr, MethodKind)>>,
    delay: Mutex<Duration>,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A host answering ICMP in 5ms.
    pub fn add_host(&self, ip: Ipv4Addr, mac: Option<&str>) {
        let mut host = FakeHost {
            mac: mac.map(str::to_string),
            ..FakeHost::default()
        };
        host.answers.insert(MethodKind::Icmp, vec![hit(5)]);
        self.hosts.lock().unwrap().insert(ip, host);
    }

    /// Replace the answers of one method on an existing host.
    pub fn script(&self, ip: Ipv4Addr, kind: MethodKind, answers: Vec<ProbeOutcome>) {
        let mut hosts = self.hosts.lock().unwrap();
        hosts.entry(ip).or_default().answers.insert(kind, answers);
    }

    pub fn remove_host(&self, ip: Ipv4Addr) {
        self.hosts.lock().unwrap().remove(&ip);
    }

    /// Every probe takes this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self, ip: Ipv4Addr, kind: MethodKind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(i, k)| *i == ip && *k == kind)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn probe(&self, ip: Ipv4Addr, method: &ProbeMethod, _timeout: Duration) -> ProbeOutcome {
        self.calls.lock().unwrap().push((ip, method.kind()));
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut hosts = self.hosts.lock().unwrap();
        let Some(queue) = hosts
            .get_mut(&ip)
            .and_then(|h| h.answers.get_mut(&method.kind()))
        else {
            return ProbeOutcome::NoResponse;
        };
        if queue.len() > 1 {
            queue.remove(0)
        } else {
            queue.first().copied().unwrap_or(ProbeOutcome::NoResponse)
        }
    }

    async fn neighbours(&self) -> ArpTable {
        let hosts = self.hosts.lock().unwrap();
        ArpTable::from_entries(hosts.iter().filter_map(|(ip, host)| {
            host.mac.as_ref().map(|mac| NeighbourEntry {
                ip: *ip,
                mac: Some(mac.clone()),
                state: NeighbourState::Reachable,
                hostname: None,
            })
        }))
    }

    async fn resolve_hostname(&self, _ip: Ipv4Addr, _timeout: Duration) -> Option<String> {
        None
    }

    async fn open_ports(&self, _ip: Ipv4Addr, _ports: &[u16], _timeout: Duration) -> Vec<u16> {
        Vec::new()
    }
}

/// A memory store whose record appends can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_appends: AtomicBool,
}

impl FlakyStore {
    pub fn fail_appends(&self) {
        self.fail_appends.store(true, Ordering::SeqCst);
    }
}

impl Store for FlakyStore {
    fn upsert_device(&self, device: &Device) -> Result<(), StoreError> {
        self.inner.upsert_device(device)
    }

    fn get_device(&self, id: &DeviceId) -> Result<Option<Device>, StoreError> {
        self.inner.get_device(id)
    }

    fn query_devices(&self) -> Result<Vec<Device>, StoreError> {
        self.inner.query_devices()
    }

    fn append_scan_record(&self, record: &ScanRecord) -> Result<(), StoreError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk full".into()));
        }
        self.inner.append_scan_record(record)
    }

    fn query_records(&self, device_id: &DeviceId, range: &TimeRange) -> Result<Vec<ScanRecord>, StoreError> {
        self.inner.query_records(device_id, range)
    }

    fn open_session(&self, subnet: &str, scan_type: ScanType) -> Result<SessionId, StoreError> {
        self.inner.open_session(subnet, scan_type)
    }

    fn close_session(
        &self,
        id: &SessionId,
        devices_found: u32,
        outcome: SessionOutcome,
    ) -> Result<(), StoreError> {
        self.inner.close_session(id, devices_found, outcome)
    }

    fn list_sessions(&self, limit: usize) -> Result<Vec<ScanSession>, StoreError> {
        self.inner.list_sessions(limit)
    }

    fn load_scan_config(&self) -> Result<Option<ScanConfig>, StoreError> {
        self.inner.load_scan_config()
    }

    fn save_scan_config(&self, config: &ScanConfig) -> Result<(), StoreError> {
        self.inner.save_scan_config(config)
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<PruneStats, StoreError> {
        self.inner.prune_before(cutoff)
    }
}

/// Fast, deterministic settings over `10.0.0.0/29` (hosts .1 to .6).
pub fn test_patch() -> ScanConfigPatch {
    ScanConfigPatch {
        subnet_cidr: Some("10.0.0.0/29".into()),
        auto_detect_subnet: Some(false),
        exclude_ips: Some(Vec::new()),
        scan_rate: Some(1000),
        max_workers: Some(8),
        scan_timeout: Some("50ms".into()),
        max_retries: Some(1),
        resolve_hostnames: Some(false),
        fetch_vendor_info: Some(true),
        arp_lookup_enabled: Some(true),
        fallback_enabled: Some(false),
        ping_methods: Some(vec![MethodKind::Icmp]),
        tcp_ping_ports: Some(vec![22]),
        ack_ping_ports: Some(vec![80]),
        enable_port_scan: Some(false),
        port_range: None,
    }
}

pub fn engine_with(store: Arc<dyn Store>, network: Arc<FakeNetwork>, patch: &ScanConfigPatch) -> ScanEngine {
    let engine = ScanEngine::new(store, network, VendorCache::new(), 64).unwrap();
    engine.provider().update(&test_patch()).unwrap();
    engine.provider().update(patch).unwrap();
    engine
}

pub fn engine(network: Arc<FakeNetwork>) -> (Arc<MemoryStore>, ScanEngine) {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(store.clone(), network, &ScanConfigPatch::default());
    (store, engine)
}

pub fn all_time() -> TimeRange {
    TimeRange::new(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
}
