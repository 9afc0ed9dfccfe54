//! Rate-limited dispatch of host probes.
//!
//! A bounded pool of `max_workers` tasks probes the candidate hosts of one
//! pass. Every individual method probe first passes a shared pacing gate
//! that admits one probe per `1 / scan_rate` seconds.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Duration, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::probe::Network;
use crate::retry::{self, HostVerdict, ProbePlan};

/// Cooperative token gate over a tokio [`Interval`].
pub struct RateLimiter {
    interval: Mutex<Interval>,
}

impl RateLimiter {
    /// Admit at most `per_second` probes per second.
    pub fn new(per_second: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / f64::from(per_second.max(1)));
        let mut interval = interval_at(Instant::now(), period.max(Duration::from_micros(1)));
        // Idle time must not turn into a catch-up burst.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval: Mutex::new(interval),
        }
    }

    /// Wait for the next probe slot.
    pub async fn wait(&self) {
        self.interval.lock().await.tick().await;
    }
}

/// Verdicts collected by one dispatch run.
#[derive(Debug, Default)]
pub struct DispatchResult {
    /// Completed hosts only, in completion order.
    pub verdicts: Vec<HostVerdict>,
    /// True when the run stopped early on cancellation.
    pub cancelled: bool,
}

/// Runs the probe plan across a host list with bounded concurrency.
pub struct Dispatcher {
    workers: usize,
    limiter: Arc<RateLimiter>,
}

impl Dispatcher {
    pub fn new(max_workers: usize, scan_rate: u32) -> Self {
        Self {
            workers: max_workers.max(1),
            limiter: Arc::new(RateLimiter::new(scan_rate)),
        }
    }

    /// Probe every host. On cancellation no new hosts are started, in-flight
    /// tasks are aborted, and only completed verdicts are returned.
    pub async fn run(
        &self,
        network: Arc<dyn Network>,
        plan: Arc<ProbePlan>,
        hosts: Vec<Ipv4Addr>,
        cancel: &CancellationToken,
    ) -> DispatchResult {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut result = DispatchResult::default();

        for ip in hosts {
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    result.cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Harvest finished hosts so the set stays at most `workers` deep.
            while let Some(joined) = tasks.try_join_next() {
                collect(&mut result, joined);
            }

            let network = network.clone();
            let plan = plan.clone();
            let limiter = self.limiter.clone();
            tasks.spawn(async move {
                let verdict = retry::probe_host(network.as_ref(), &limiter, &plan, ip).await;
                drop(permit);
                verdict
            });
        }

        if result.cancelled {
            tasks.abort_all();
        }

        while !tasks.is_empty() {
            tokio::select! {
                _ = cancel.cancelled(), if !result.cancelled => {
                    result.cancelled = true;
                    tasks.abort_all();
                }
                joined = tasks.join_next() => match joined {
                    Some(joined) => collect(&mut result, joined),
                    None => break,
                },
            }
        }

        if result.cancelled {
            tracing::warn!(completed = result.verdicts.len(), "Probe dispatch cancelled");
        }
        result
    }
}

fn collect(result: &mut DispatchResult, joined: Result<HostVerdict, tokio::task::JoinError>) {
    match joined {
        Ok(verdict) => result.verdicts.push(verdict),
        Err(e) if e.is_cancelled() => {}
        Err(e) => tracing::error!(error = %e, "Probe task panicked"),
    }
}
