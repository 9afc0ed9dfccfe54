//! File-backed store.
//!
//! Layout under the data directory:
//! ```text
//! {root}/
//!   .lock                 held exclusively while a store is open
//!   devices.json          array of devices, rewritten on change
//!   scan_sessions.json    array of sessions, rewritten on change
//!   scan_config.json      the persisted scan configuration
//!   scan_records.jsonl    one record per line, append-only
//! ```
//! Whole-document rewrites go through a temporary file and a rename so a
//! crash never leaves a half-written document behind. Every change is
//! written first and committed to memory only once the write succeeded.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use lanwatch_core::config::ScanConfig;
use lanwatch_core::types::{
    Device, DeviceId, ScanRecord, ScanSession, ScanType, SessionId, SessionOutcome, TimeRange,
};

use crate::state::{self, StoreState};
use crate::{PruneStats, Result, Store, StoreError};

const LOCK_FILE: &str = ".lock";
const DEVICES_FILE: &str = "devices.json";
const SESSIONS_FILE: &str = "scan_sessions.json";
const CONFIG_FILE: &str = "scan_config.json";
const RECORDS_FILE: &str = "scan_records.jsonl";

/// JSON document store rooted at a data directory.
///
/// One process at a time: [`JsonFileStore::open`] takes an exclusive lock on
/// the directory and fails with [`StoreError::Locked`] if another store
/// holds it.
pub struct JsonFileStore {
    root: PathBuf,
    state: Mutex<StoreState>,
    /// Released when the store is dropped.
    _lock: File,
}

impl JsonFileStore {
    /// Open (or create) a store at the given directory and load its contents.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let lock = lock_dir(&root)?;

        let records_path = root.join(RECORDS_FILE);
        trim_torn_tail(&records_path)?;

        let state = StoreState {
            devices: read_document(&root.join(DEVICES_FILE))?.unwrap_or_default(),
            sessions: read_document(&root.join(SESSIONS_FILE))?.unwrap_or_default(),
            config: read_config(&root.join(CONFIG_FILE)),
            records: read_records(&records_path)?,
        };

        tracing::debug!(
            root = %root.display(),
            devices = state.devices.len(),
            records = state.records.len(),
            sessions = state.sessions.len(),
            "File store opened"
        );

        Ok(Self {
            root,
            state: Mutex::new(state),
            _lock: lock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    fn write_document<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.root.join(name);
        let tmp = self.root.join(format!("{name}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn rewrite_records(&self, records: &[ScanRecord]) -> Result<()> {
        let tmp = self.root.join(format!("{RECORDS_FILE}.tmp"));
        let mut out = String::new();
        for record in records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        fs::write(&tmp, out)?;
        fs::rename(&tmp, self.root.join(RECORDS_FILE))?;
        Ok(())
    }
}

impl Store for JsonFileStore {
    fn upsert_device(&self, device: &Device) -> Result<()> {
        let mut state = self.lock()?;
        let mut devices = state.devices.clone();
        state::upsert_device(&mut devices, device);
        self.write_document(DEVICES_FILE, &devices)?;
        state.devices = devices;
        Ok(())
    }

    fn get_device(&self, id: &DeviceId) -> Result<Option<Device>> {
        Ok(self.lock()?.get_device(id))
    }

    fn query_devices(&self) -> Result<Vec<Device>> {
        Ok(self.lock()?.devices_by_ip())
    }

    fn append_scan_record(&self, record: &ScanRecord) -> Result<()> {
        let mut state = self.lock()?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(RECORDS_FILE))?;
        let len = file.metadata()?.len();
        if let Err(e) = file.write_all(line.as_bytes()) {
            // Cut a partial line so the next append starts clean.
            if let Err(trim) = file.set_len(len) {
                tracing::warn!(error = %trim, "Failed to trim partial scan record");
            }
            return Err(e.into());
        }
        state.append_record(record);
        Ok(())
    }

    fn query_records(&self, device_id: &DeviceId, range: &TimeRange) -> Result<Vec<ScanRecord>> {
        Ok(self.lock()?.records_in(device_id, range))
    }

    fn open_session(&self, subnet: &str, scan_type: ScanType) -> Result<SessionId> {
        let mut state = self.lock()?;
        let mut sessions = state.sessions.clone();
        let id = state::open_session(&mut sessions, subnet, scan_type);
        self.write_document(SESSIONS_FILE, &sessions)?;
        state.sessions = sessions;
        Ok(id)
    }

    fn close_session(
        &self,
        id: &SessionId,
        devices_found: u32,
        outcome: SessionOutcome,
    ) -> Result<()> {
        let mut state = self.lock()?;
        let mut sessions = state.sessions.clone();
        state::close_session(&mut sessions, id, devices_found, outcome)?;
        self.write_document(SESSIONS_FILE, &sessions)?;
        state.sessions = sessions;
        Ok(())
    }

    fn list_sessions(&self, limit: usize) -> Result<Vec<ScanSession>> {
        Ok(self.lock()?.recent_sessions(limit))
    }

    fn load_scan_config(&self) -> Result<Option<ScanConfig>> {
        Ok(self.lock()?.config.clone())
    }

    fn save_scan_config(&self, config: &ScanConfig) -> Result<()> {
        let mut state = self.lock()?;
        self.write_document(CONFIG_FILE, config)?;
        state.config = Some(config.clone());
        Ok(())
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<PruneStats> {
        let mut state = self.lock()?;

        let mut records = state.records.clone();
        let pruned_records = state::prune_records(&mut records, cutoff);
        if pruned_records > 0 {
            self.rewrite_records(&records)?;
            state.records = records;
        }

        let mut sessions = state.sessions.clone();
        let pruned_sessions = state::prune_sessions(&mut sessions, cutoff);
        if pruned_sessions > 0 {
            self.write_document(SESSIONS_FILE, &sessions)?;
            state.sessions = sessions;
        }

        Ok(PruneStats {
            records: pruned_records,
            sessions: pruned_sessions,
        })
    }
}

fn lock_dir(root: &Path) -> Result<File> {
    let path = root.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(e) if is_contended(&e) => Err(StoreError::Locked(root.display().to_string())),
        Err(e) => Err(e.into()),
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Cut the record log back to its last complete line. An append interrupted
/// mid-line would otherwise swallow the next record appended after it.
fn trim_torn_tail(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let bytes = fs::read(path)?;
    if bytes.last().map_or(true, |b| *b == b'\n') {
        return Ok(());
    }
    let keep = bytes
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |at| at + 1);
    tracing::warn!(
        path = %path.display(),
        dropped_bytes = bytes.len() - keep,
        "Trimming partial scan record"
    );
    OpenOptions::new()
        .write(true)
        .open(path)?
        .set_len(keep as u64)?;
    Ok(())
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&json)?))
}

/// An unreadable config is ignored so the caller falls back to defaults.
fn read_config(path: &Path) -> Option<ScanConfig> {
    match read_document(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable scan config");
            None
        }
    }
}

/// Load the record log, skipping lines that fail to parse.
fn read_records(path: &Path) -> Result<Vec<ScanRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ScanRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(line = n + 1, error = %e, "Skipping malformed scan record");
            }
        }
    }
    records.sort_by_key(|r| r.scan_time);
    Ok(records)
}
