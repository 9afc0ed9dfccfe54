//! Store contract tests, run against every backend.
//!
//! Run with: cargo test --package lanwatch-store --test integration

use std::net::Ipv4Addr;

use chrono::{DateTime, Duration, TimeZone, Utc};

use lanwatch_core::config::{Preset, ScanConfig};
use lanwatch_core::types::{
    Device, ScanRecord, ScanType, SessionOutcome, SessionStatus, TimeRange,
};
use lanwatch_store::{JsonFileStore, MemoryStore, Store, StoreError};

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 10, hour, 0, 0).unwrap()
}

fn device(last: u8, mac: Option<&str>) -> Device {
    Device::discovered(Ipv4Addr::new(192, 168, 0, last), mac.map(str::to_string), at(0))
}

fn record(device: &Device, hour: u32, online: bool) -> ScanRecord {
    ScanRecord {
        device_id: device.id,
        scan_time: at(hour),
        is_online: online,
        response_time: online.then_some(hour),
    }
}

fn exercise_devices(store: &dyn Store) {
    let router = device(1, Some("A4:2B:B0:11:22:33"));
    let laptop = device(20, None);
    let nas = device(3, Some("00:11:32:AA:BB:CC"));
    for d in [&laptop, &router, &nas] {
        store.upsert_device(d).unwrap();
    }

    let ips: Vec<_> = store
        .query_devices()
        .unwrap()
        .into_iter()
        .map(|d| d.ip.octets()[3])
        .collect();
    assert_eq!(ips, vec![1, 3, 20], "ordered by address, not insertion");

    let mut moved = laptop.clone();
    moved.ip = Ipv4Addr::new(192, 168, 0, 2);
    moved.is_online = false;
    store.upsert_device(&moved).unwrap();
    assert_eq!(store.query_devices().unwrap().len(), 3, "upsert replaces by id");
    assert_eq!(store.get_device(&laptop.id).unwrap(), Some(moved));

    let named = store.set_custom_name_by_mac("00-11-32-aa-bb-cc", Some("Backup NAS")).unwrap();
    assert_eq!(named.id, nas.id);
    assert_eq!(store.search_devices("backup").unwrap().len(), 1);
    assert!(matches!(
        store.set_custom_name_by_mac("02:00:00:00:00:00", Some("ghost")),
        Err(StoreError::DeviceNotFound(_))
    ));

    let stats = store.stats(at(12)).unwrap();
    assert_eq!(stats.total_devices, 3);
    assert_eq!(stats.online_devices, 2);
    assert_eq!(stats.offline_devices, 1);
}

fn exercise_records(store: &dyn Store) {
    let host = device(7, None);
    store.upsert_device(&host).unwrap();
    // Appended out of order on purpose.
    for (hour, online) in [(3, true), (1, true), (5, false), (2, false)] {
        store.append_scan_record(&record(&host, hour, online)).unwrap();
    }

    let all = store
        .query_records(&host.id, &TimeRange::new(at(0), at(23)))
        .unwrap();
    let hours: Vec<_> = all.iter().map(|r| r.scan_time).collect();
    assert_eq!(hours, vec![at(1), at(2), at(3), at(5)]);

    let window = store
        .query_records(&host.id, &TimeRange::new(at(2), at(5)))
        .unwrap();
    assert_eq!(window.len(), 2, "half-open window");

    let seed = store.last_record_before(&host.id, at(3)).unwrap().unwrap();
    assert_eq!(seed.scan_time, at(2));
    assert!(store.last_record_before(&host.id, at(1)).unwrap().is_none());
}

fn exercise_sessions(store: &dyn Store) {
    let first = store.open_session("192.168.0.0/24", ScanType::Scheduled).unwrap();
    store.close_session(&first, 4, SessionOutcome::Completed).unwrap();
    assert!(matches!(
        store.close_session(&first, 4, SessionOutcome::Completed),
        Err(StoreError::SessionClosed(_))
    ));

    let second = store.open_session("192.168.0.0/24", ScanType::Manual).unwrap();
    let sessions = store.list_sessions(10).unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].id, second, "newest first");
    assert_eq!(sessions[0].status(None), SessionStatus::Stale);
    assert_eq!(sessions[0].status(Some(&second)), SessionStatus::Running);
    assert_eq!(sessions[1].status(None), SessionStatus::Completed);
    assert_eq!(sessions[1].devices_found, 4);

    // A past cutoff keeps both; a future one also takes the left-open session.
    let pruned = store.prune_before(Utc::now() - Duration::days(1)).unwrap();
    assert_eq!(pruned.sessions, 0);
    assert_eq!(store.list_sessions(10).unwrap().len(), 2);

    let pruned = store.prune_before(Utc::now() + Duration::days(1)).unwrap();
    assert_eq!(pruned.sessions, 2);
    assert!(store.list_sessions(10).unwrap().is_empty());
}

fn exercise_config(store: &dyn Store) {
    assert_eq!(store.load_scan_config().unwrap(), None);
    let config = ScanConfig {
        subnet_cidr: Some("192.168.0.0/24".into()),
        ..Preset::Thorough.config()
    };
    store.save_scan_config(&config).unwrap();
    assert_eq!(store.load_scan_config().unwrap(), Some(config));
}

fn exercise_all(store: &dyn Store) {
    exercise_config(store);
    exercise_devices(store);
    exercise_records(store);
    exercise_sessions(store);
}

#[test]
fn memory_store_contract() {
    exercise_all(&MemoryStore::new());
}

#[test]
fn file_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    exercise_all(&JsonFileStore::open(dir.path()).unwrap());
}

#[test]
fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let host = device(9, Some("B8:27:EB:00:00:09"));
    {
        let store = JsonFileStore::open(dir.path()).unwrap();
        store.upsert_device(&host).unwrap();
        store.append_scan_record(&record(&host, 4, true)).unwrap();
        store.open_session("192.168.0.0/24", ScanType::Manual).unwrap();
    }

    let store = JsonFileStore::open(dir.path()).unwrap();
    assert_eq!(store.get_device(&host.id).unwrap(), Some(host.clone()));
    assert_eq!(
        store
            .query_records(&host.id, &TimeRange::new(at(0), at(23)))
            .unwrap()
            .len(),
        1
    );
    let sessions = store.list_sessions(1).unwrap();
    assert_eq!(sessions[0].end_time, None);
    assert_eq!(sessions[0].status(None), SessionStatus::Stale);
}
