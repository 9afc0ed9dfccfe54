//! The scan engine.
//!
//! One pass: claim exclusivity → resolve subnet → open session → dispatch
//! probes → read neighbours and enrich → apply state → persist → close
//! session → publish events. Configuration problems are reported before a
//! session is opened. A store failure after that point closes the session
//! as failed and aborts the pass.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use lanwatch_core::config::{MethodKind, ScanConfig};
use lanwatch_core::events::{EventPayload, LanwatchEvent};
use lanwatch_core::types::{
    DayTimeline, Device, DeviceId, NetworkStats, ReportStatus, ScanReport, ScanSession, ScanType,
    SessionId, SessionOutcome, SessionStatus,
};
use lanwatch_store::file::JsonFileStore;
use lanwatch_store::{PruneStats, Store};

use crate::aggregate::{self, Enrichment};
use crate::config::DiscoverConfig;
use crate::dispatch::Dispatcher;
use crate::error::{DiscoverError, Result};
use crate::probe::{ArpTable, Network, SystemNetwork};
use crate::provider::ConfigProvider;
use crate::retry::ProbePlan;
use crate::session::SessionManager;
use crate::state::{self, DeviceTable};
use crate::subnet::{self, ResolvedSubnet};
use crate::timeline;
use crate::vendor::VendorCache;

/// What to scan and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub scan_type: ScanType,
    /// Overrides the configured subnet for this pass only.
    pub subnet: Option<String>,
    /// Replaces the enabled method set for this pass only.
    pub methods: Option<Vec<MethodKind>>,
}

impl ScanRequest {
    pub fn manual() -> Self {
        Self {
            scan_type: ScanType::Manual,
            subnet: None,
            methods: None,
        }
    }

    pub fn scheduled() -> Self {
        Self {
            scan_type: ScanType::Scheduled,
            ..Self::manual()
        }
    }

    pub fn with_subnet(mut self, cidr: impl Into<String>) -> Self {
        self.subnet = Some(cidr.into());
        self
    }

    pub fn with_methods(mut self, methods: Vec<MethodKind>) -> Self {
        self.methods = Some(methods);
        self
    }
}

/// A session together with its derived status.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: ScanSession,
    pub status: SessionStatus,
}

/// Result of the probing part of a pass, before the session is closed.
struct PassSummary {
    devices_found: u32,
    cancelled: bool,
    events: Vec<EventPayload>,
}

pub struct ScanEngine {
    store: Arc<dyn Store>,
    network: Arc<dyn Network>,
    provider: ConfigProvider,
    sessions: SessionManager,
    vendors: VendorCache,
    events: broadcast::Sender<LanwatchEvent>,
}

impl ScanEngine {
    pub fn new(
        store: Arc<dyn Store>,
        network: Arc<dyn Network>,
        vendors: VendorCache,
        event_buffer: usize,
    ) -> Result<Self> {
        let provider = ConfigProvider::load(store.clone())?;
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Ok(Self {
            store,
            network,
            provider,
            sessions: SessionManager::new(),
            vendors,
            events,
        })
    }

    /// Engine over the file store in `data_dir` and the host network.
    pub fn from_config(config: &DiscoverConfig) -> Result<Self> {
        let store = JsonFileStore::open(&config.data_dir)?;
        let vendors = match &config.oui_file {
            Some(path) => VendorCache::with_registry(path).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "OUI registry unreadable, using built-in table");
                VendorCache::new()
            }),
            None => VendorCache::new(),
        };
        Self::new(
            Arc::new(store),
            Arc::new(SystemNetwork::new()),
            vendors,
            config.event_buffer,
        )
    }

    pub fn provider(&self) -> &ConfigProvider {
        &self.provider
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LanwatchEvent> {
        self.events.subscribe()
    }

    /// Session id of the pass running right now, if any.
    pub fn active_session(&self) -> Option<SessionId> {
        self.sessions.active_session()
    }

    // ── Scan passes ───────────────────────────────────────────────

    /// Run a pass and fold any failure into an error report.
    pub async fn scan(&self, request: ScanRequest, cancel: &CancellationToken) -> ScanReport {
        let scan_type = request.scan_type;
        let subnet = request.subnet.clone();
        match self.run_pass(request, cancel).await {
            Ok(report) => report,
            Err(e) => ScanReport::error(scan_type, subnet, e.to_string()),
        }
    }

    /// Run one pass. Rejected with [`DiscoverError::SessionBusy`] while
    /// another pass is active.
    pub async fn run_pass(&self, request: ScanRequest, cancel: &CancellationToken) -> Result<ScanReport> {
        let guard = self.sessions.try_claim()?;
        let started = Instant::now();

        let config = self.pass_config(&request)?;
        let resolved = subnet::resolve(&config, None)?;
        let plan = Arc::new(ProbePlan::from_config(&config)?);
        let scan_ports = if config.enable_port_scan {
            config.port_scan_ports()?
        } else {
            Vec::new()
        };
        let subnet = resolved.network.to_string();

        let session_id = self.store.open_session(&subnet, request.scan_type)?;
        guard.activate(session_id);
        tracing::info!(
            session_id = %session_id,
            subnet = %subnet,
            scan_type = %request.scan_type,
            candidates = resolved.hosts.len(),
            methods = plan.primary.len(),
            "Scan started"
        );
        self.publish(EventPayload::ScanStarted {
            session_id,
            scan_type: request.scan_type,
            subnet: subnet.clone(),
            candidates: resolved.hosts.len() as u32,
        });

        let summary = match self
            .execute(&config, resolved, plan, scan_ports, cancel)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Scan failed");
                if let Err(close) = self.store.close_session(&session_id, 0, SessionOutcome::Failed) {
                    tracing::error!(session_id = %session_id, error = %close, "Failed to close session");
                }
                self.publish(EventPayload::ScanCompleted {
                    session_id,
                    outcome: SessionOutcome::Failed,
                    devices_found: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                return Err(e);
            }
        };

        let outcome = if summary.cancelled {
            SessionOutcome::Aborted
        } else {
            SessionOutcome::Completed
        };
        self.store
            .close_session(&session_id, summary.devices_found, outcome)?;
        drop(guard);

        for event in summary.events {
            self.publish(event);
        }
        let duration = started.elapsed();
        self.publish(EventPayload::ScanCompleted {
            session_id,
            outcome,
            devices_found: summary.devices_found,
            duration_ms: duration.as_millis() as u64,
        });
        tracing::info!(
            session_id = %session_id,
            subnet = %subnet,
            devices_found = summary.devices_found,
            outcome = ?outcome,
            duration_ms = duration.as_millis() as u64,
            "Scan complete"
        );

        Ok(ScanReport {
            status: if summary.cancelled {
                ReportStatus::Error
            } else {
                ReportStatus::Success
            },
            subnet: Some(subnet),
            devices_found: summary.devices_found,
            scan_type: request.scan_type,
            duration: duration.as_secs_f64(),
            session_id: Some(session_id),
            message: summary.cancelled.then(|| "Scan aborted".to_string()),
        })
    }

    /// The configuration for one pass with the request's overrides applied.
    fn pass_config(&self, request: &ScanRequest) -> Result<ScanConfig> {
        let mut config = self.provider.get();
        if let Some(methods) = &request.methods {
            if methods.is_empty() {
                return Err(DiscoverError::InvalidRequest(
                    "method selector must name at least one method".into(),
                ));
            }
            config = config.with_methods(methods);
        }
        if let Some(cidr) = &request.subnet {
            config.subnet_cidr = Some(cidr.trim().to_string());
        }
        config.check()?;
        Ok(config)
    }

    async fn execute(
        &self,
        config: &ScanConfig,
        resolved: ResolvedSubnet,
        plan: Arc<ProbePlan>,
        scan_ports: Vec<u16>,
        cancel: &CancellationToken,
    ) -> Result<PassSummary> {
        let mut table = DeviceTable::new(self.store.query_devices()?);

        let workers = config.max_workers as usize;
        let dispatched = Dispatcher::new(workers, config.scan_rate)
            .run(self.network.clone(), plan.clone(), resolved.hosts, cancel)
            .await;
        let cancelled = dispatched.cancelled;

        let neighbours = if config.arp_lookup_enabled {
            self.network.neighbours().await
        } else {
            ArpTable::default()
        };

        // An aborted pass records what it has without further slow lookups.
        let enrichment = Enrichment {
            resolve_hostnames: config.resolve_hostnames && !cancelled,
            fetch_vendor_info: config.fetch_vendor_info,
            scan_ports: if cancelled { Vec::new() } else { scan_ports },
            timeout: plan.timeout,
            concurrency: workers,
        };
        let observations = aggregate::aggregate(
            self.network.as_ref(),
            &self.vendors,
            &neighbours,
            dispatched.verdicts,
            &enrichment,
        )
        .await;

        let now = Utc::now();
        let transitions = state::apply_pass(&mut table, &observations, now);
        for transition in &transitions {
            self.store.upsert_device(&transition.device)?;
            self.store.append_scan_record(&transition.record)?;
        }

        Ok(PassSummary {
            devices_found: observations.iter().filter(|o| o.online).count() as u32,
            cancelled,
            events: transitions.into_iter().filter_map(|t| t.event).collect(),
        })
    }

    fn publish(&self, payload: EventPayload) {
        match &payload {
            EventPayload::DeviceDiscovered { device_id, ip, mac } => {
                tracing::info!(device_id = %device_id, ip = %ip, mac = ?mac, "Device discovered");
            }
            EventPayload::DeviceOnline { device_id, ip } => {
                tracing::info!(device_id = %device_id, ip = %ip, "Device online");
            }
            EventPayload::DeviceOffline { device_id, ip, .. } => {
                tracing::info!(device_id = %device_id, ip = %ip, "Device offline");
            }
            _ => {}
        }
        // No subscribers is not an error.
        let _ = self.events.send(LanwatchEvent::new(payload));
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn devices(&self) -> Result<Vec<Device>> {
        Ok(self.store.query_devices()?)
    }

    pub fn search_devices(&self, query: &str) -> Result<Vec<Device>> {
        Ok(self.store.search_devices(query)?)
    }

    /// Set or clear a device alias. `target` is a device id or a MAC address.
    pub fn set_alias(&self, target: &str, name: Option<&str>) -> Result<Device> {
        let device = match target.parse::<DeviceId>() {
            Ok(id) => self.store.set_custom_name(&id, name)?,
            Err(_) => self.store.set_custom_name_by_mac(target, name)?,
        };
        tracing::info!(device_id = %device.id, alias = ?device.custom_name, "Device alias updated");
        Ok(device)
    }

    /// Most recent sessions first, with derived status.
    pub fn sessions(&self, limit: usize) -> Result<Vec<SessionView>> {
        let active = self.active_session();
        Ok(self
            .store
            .list_sessions(limit)?
            .into_iter()
            .map(|session| SessionView {
                status: session.status(active.as_ref()),
                session,
            })
            .collect())
    }

    pub fn timeline<Tz: TimeZone>(
        &self,
        date: NaiveDate,
        tz: &Tz,
        device: Option<&DeviceId>,
    ) -> Result<DayTimeline> {
        Ok(timeline::build_day(
            self.store.as_ref(),
            date,
            tz,
            Utc::now(),
            device,
        )?)
    }

    pub fn stats(&self) -> Result<NetworkStats> {
        Ok(self.store.stats(Utc::now())?)
    }

    /// Drop records and sessions older than `retention_days`.
    ///
    /// Holds the pass claim while pruning, so the session of a running pass
    /// is never removed. Fails with [`DiscoverError::SessionBusy`] during a pass.
    pub fn prune(&self, retention_days: u32, now: DateTime<Utc>) -> Result<PruneStats> {
        let _guard = self.sessions.try_claim()?;
        let cutoff = now - chrono::Duration::days(i64::from(retention_days));
        let stats = self.store.prune_before(cutoff)?;
        if stats.records > 0 || stats.sessions > 0 {
            tracing::info!(
                records = stats.records,
                sessions = stats.sessions,
                cutoff = %cutoff,
                "Pruned scan history"
            );
        }
        Ok(stats)
    }
}
