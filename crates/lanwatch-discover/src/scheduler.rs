//! Scheduled scanning.
//!
//! Runs a pass every `scan_interval_secs` until cancelled, then prunes scan
//! history past the retention window. A tick that finds a manual pass still
//! running is skipped, not queued.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use lanwatch_core::types::ScanReport;

use crate::config::DiscoverConfig;
use crate::engine::{ScanEngine, ScanRequest};
use crate::error::DiscoverError;

pub struct ScanScheduler {
    engine: Arc<ScanEngine>,
    interval: Duration,
    enabled: bool,
    retention_days: u32,
}

impl ScanScheduler {
    pub fn new(engine: Arc<ScanEngine>, config: &DiscoverConfig) -> Self {
        Self {
            engine,
            interval: Duration::from_secs(config.scan_interval_secs.max(1)),
            enabled: config.auto_scan_enabled,
            retention_days: config.retention_days,
        }
    }

    /// Tick until `cancel` fires. Cancelling also aborts an in-flight pass.
    pub async fn run(&self, cancel: CancellationToken) {
        if !self.enabled {
            tracing::info!("Automatic scanning disabled");
            cancel.cancelled().await;
            return;
        }

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_secs = self.interval.as_secs(), "Scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick(&cancel).await;
        }

        tracing::info!("Scheduler stopped");
    }

    /// One scheduled pass followed by retention cleanup.
    pub async fn tick(&self, cancel: &CancellationToken) -> Option<ScanReport> {
        tracing::info!("Scheduled scan triggered");
        match self.engine.run_pass(ScanRequest::scheduled(), cancel).await {
            Ok(report) => {
                if let Err(e) = self.engine.prune(self.retention_days, Utc::now()) {
                    tracing::warn!(error = %e, "Retention cleanup failed");
                }
                Some(report)
            }
            Err(DiscoverError::SessionBusy) => {
                tracing::info!("Scan already running, skipping scheduled pass");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "Scheduled scan failed");
                None
            }
        }
    }
}
