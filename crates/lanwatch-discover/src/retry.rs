//! Retry and fallback control for one host.
//!
//! The enabled method set is tried as a group: all methods run concurrently
//! and the host is online if any of them responds. An attempt in which every
//! method stayed silent is inconclusive and is retried after a short
//! backoff. Once the budget is spent, configured-but-disabled methods are
//! tried one at a time. Exhausting everything is an offline verdict, never
//! an error.

use std::net::Ipv4Addr;
use std::time::Duration;

use futures::future::join_all;

use lanwatch_core::config::{MethodKind, ProbeMethod, ScanConfig};
use lanwatch_core::error::ConfigError;

use crate::dispatch::RateLimiter;
use crate::probe::Network;

/// Base backoff between attempts; attempt `n` (1-based) first waits `n - 1` times this.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Result of one attempt with one method group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Online {
        /// Fastest measured round trip among the methods that responded.
        latency: Option<Duration>,
        /// First responding method in escalation order.
        method: MethodKind,
    },
    /// Every method in the group stayed silent.
    Inconclusive,
}

/// Final liveness verdict for one host in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostVerdict {
    pub ip: Ipv4Addr,
    pub online: bool,
    pub response_time: Option<Duration>,
    pub method: Option<MethodKind>,
    /// Attempts made across primary and fallback groups.
    pub attempts: u32,
}

impl HostVerdict {
    pub fn response_time_ms(&self) -> Option<u32> {
        self.response_time
            .map(|rt| u32::try_from(rt.as_millis()).unwrap_or(u32::MAX))
    }
}

/// How every host of a pass is probed.
#[derive(Debug, Clone)]
pub struct ProbePlan {
    pub primary: Vec<ProbeMethod>,
    /// Tried one at a time after the primary group is exhausted.
    pub fallback: Vec<ProbeMethod>,
    /// Attempts per group, at least one.
    pub attempts: u32,
    pub timeout: Duration,
    pub backoff: Duration,
}

impl ProbePlan {
    pub fn from_config(config: &ScanConfig) -> Result<Self, ConfigError> {
        let primary = config.enabled_methods();
        if primary.is_empty() {
            return Err(ConfigError::NoProbeMethods);
        }
        Ok(Self {
            primary,
            fallback: config.fallback_methods(),
            attempts: config.max_retries.max(1),
            timeout: config.timeout()?,
            backoff: RETRY_BACKOFF,
        })
    }
}

/// Probe one host to a definitive verdict.
pub async fn probe_host(
    network: &dyn Network,
    limiter: &RateLimiter,
    plan: &ProbePlan,
    ip: Ipv4Addr,
) -> HostVerdict {
    let mut attempts = 0;

    let groups = std::iter::once(plan.primary.as_slice())
        .chain(plan.fallback.iter().map(std::slice::from_ref));

    for (index, group) in groups.enumerate() {
        if index == 1 {
            tracing::debug!(ip = %ip, "Primary methods exhausted, falling back");
        }
        for attempt in 1..=plan.attempts {
            if attempt > 1 {
                tokio::time::sleep(plan.backoff * (attempt - 1)).await;
            }
            attempts += 1;
            if let AttemptOutcome::Online { latency, method } =
                attempt_group(network, limiter, group, ip, plan.timeout).await
            {
                tracing::debug!(ip = %ip, method = %method, attempts, "Host responded");
                return HostVerdict {
                    ip,
                    online: true,
                    response_time: latency,
                    method: Some(method),
                    attempts,
                };
            }
        }
    }

    tracing::debug!(ip = %ip, attempts, "Host offline");
    HostVerdict {
        ip,
        online: false,
        response_time: None,
        method: None,
        attempts,
    }
}

/// Run every method of a group concurrently, each behind the pacing gate.
pub async fn attempt_group(
    network: &dyn Network,
    limiter: &RateLimiter,
    group: &[ProbeMethod],
    ip: Ipv4Addr,
    timeout: Duration,
) -> AttemptOutcome {
    let outcomes = join_all(group.iter().map(|method| async move {
        limiter.wait().await;
        (method.kind(), network.probe(ip, method, timeout).await)
    }))
    .await;

    let responded: Vec<_> = outcomes.into_iter().filter(|(_, o)| o.responded()).collect();
    let Some((method, _)) = responded.first() else {
        return AttemptOutcome::Inconclusive;
    };
    AttemptOutcome::Online {
        latency: responded.iter().filter_map(|(_, o)| o.latency()).min(),
        method: *method,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::probe::{ArpTable, ProbeOutcome};

    /// Scripted answers per method kind; each call pops the next answer,
    /// repeating the last one.
    #[derive(Default)]
    struct Scripted {
        answers: Mutex<HashMap<MethodKind, Vec<ProbeOutcome>>>,
        calls: Mutex<Vec<MethodKind>>,
    }

    impl Scripted {
        fn answer(self, kind: MethodKind, outcomes: Vec<ProbeOutcome>) -> Self {
            self.answers.lock().unwrap().insert(kind, outcomes);
            self
        }

        fn calls(&self, kind: MethodKind) -> usize {
            self.calls.lock().unwrap().iter().filter(|k| **k == kind).count()
        }
    }

    #[async_trait]
    impl Network for Scripted {
        async fn probe(&self, _: Ipv4Addr, method: &ProbeMethod, _: Duration) -> ProbeOutcome {
            self.calls.lock().unwrap().push(method.kind());
            let mut answers = self.answers.lock().unwrap();
            match answers.get_mut(&method.kind()) {
                Some(queue) if queue.len() > 1 => queue.remove(0),
                Some(queue) => queue.first().copied().unwrap_or(ProbeOutcome::NoResponse),
                None => ProbeOutcome::NoResponse,
            }
        }

        async fn neighbours(&self) -> ArpTable {
            ArpTable::default()
        }

        async fn resolve_hostname(&self, _: Ipv4Addr, _: Duration) -> Option<String> {
            None
        }

        async fn open_ports(&self, _: Ipv4Addr, _: &[u16], _: Duration) -> Vec<u16> {
            Vec::new()
        }
    }

    fn hit(ms: u64) -> ProbeOutcome {
        ProbeOutcome::Responded {
            latency: Some(Duration::from_millis(ms)),
        }
    }

    fn plan(primary: Vec<ProbeMethod>, fallback: Vec<ProbeMethod>, attempts: u32) -> ProbePlan {
        ProbePlan {
            primary,
            fallback,
            attempts,
            timeout: Duration::from_millis(10),
            backoff: Duration::from_millis(1),
        }
    }

    const IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);

    #[tokio::test]
    async fn any_responding_method_makes_host_online() {
        let net = Scripted::default().answer(MethodKind::TcpSyn, vec![hit(4)]);
        let limiter = RateLimiter::new(1000);
        let plan = plan(vec![ProbeMethod::Icmp, ProbeMethod::TcpSyn(vec![22])], vec![], 1);

        let verdict = probe_host(&net, &limiter, &plan, IP).await;
        assert!(verdict.online);
        assert_eq!(verdict.method, Some(MethodKind::TcpSyn));
        assert_eq!(verdict.response_time_ms(), Some(4));
        assert_eq!(verdict.attempts, 1);
    }

    #[tokio::test]
    async fn response_time_is_minimum_latency() {
        let net = Scripted::default()
            .answer(MethodKind::Icmp, vec![hit(9)])
            .answer(MethodKind::TcpSyn, vec![hit(3)])
            .answer(MethodKind::Arp, vec![ProbeOutcome::Responded { latency: None }]);
        let limiter = RateLimiter::new(1000);
        let plan = plan(
            vec![ProbeMethod::Icmp, ProbeMethod::TcpSyn(vec![80]), ProbeMethod::Arp],
            vec![],
            1,
        );

        let verdict = probe_host(&net, &limiter, &plan, IP).await;
        assert_eq!(verdict.response_time, Some(Duration::from_millis(3)));
        assert_eq!(verdict.method, Some(MethodKind::Icmp));
    }

    #[tokio::test]
    async fn neighbour_table_only_response_has_no_latency() {
        let net = Scripted::default()
            .answer(MethodKind::Arp, vec![ProbeOutcome::Responded { latency: None }]);
        let limiter = RateLimiter::new(1000);
        let verdict = probe_host(&net, &limiter, &plan(vec![ProbeMethod::Arp], vec![], 1), IP).await;
        assert!(verdict.online);
        assert_eq!(verdict.response_time, None);
    }

    #[tokio::test]
    async fn inconclusive_attempts_are_retried() {
        let net = Scripted::default().answer(
            MethodKind::Icmp,
            vec![ProbeOutcome::NoResponse, ProbeOutcome::NoResponse, hit(2)],
        );
        let limiter = RateLimiter::new(1000);
        let verdict = probe_host(&net, &limiter, &plan(vec![ProbeMethod::Icmp], vec![], 3), IP).await;
        assert!(verdict.online);
        assert_eq!(verdict.attempts, 3);
        assert_eq!(net.calls(MethodKind::Icmp), 3);
    }

    #[tokio::test]
    async fn fallback_runs_after_primary_budget() {
        let net = Scripted::default().answer(MethodKind::TcpSyn, vec![hit(5)]);
        let limiter = RateLimiter::new(1000);
        let plan = plan(
            vec![ProbeMethod::Icmp],
            vec![ProbeMethod::TcpSyn(vec![22]), ProbeMethod::Arp],
            2,
        );

        let verdict = probe_host(&net, &limiter, &plan, IP).await;
        assert!(verdict.online);
        assert_eq!(verdict.method, Some(MethodKind::TcpSyn));
        assert_eq!(net.calls(MethodKind::Icmp), 2);
        assert_eq!(net.calls(MethodKind::TcpSyn), 1);
        assert_eq!(net.calls(MethodKind::Arp), 0);
    }

    #[tokio::test]
    async fn exhausted_host_is_offline_not_error() {
        let net = Scripted::default();
        let limiter = RateLimiter::new(1000);
        let plan = plan(vec![ProbeMethod::Icmp], vec![ProbeMethod::Arp], 2);

        let verdict = probe_host(&net, &limiter, &plan, IP).await;
        assert!(!verdict.online);
        assert_eq!(verdict.response_time, None);
        assert_eq!(verdict.method, None);
        assert_eq!(verdict.attempts, 4);
    }

    #[tokio::test]
    async fn backoff_grows_linearly_from_an_immediate_first_try() {
        let net = Scripted::default();
        let limiter = RateLimiter::new(1000);
        let plan = ProbePlan {
            backoff: Duration::from_millis(40),
            ..plan(vec![ProbeMethod::Icmp], vec![], 3)
        };

        let start = tokio::time::Instant::now();
        probe_host(&net, &limiter, &plan, IP).await;
        // 0 + 40ms + 80ms of sleeping across three attempts.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(120));
        assert!(elapsed < Duration::from_millis(200));
    }

    #[test]
    fn plan_from_config() {
        let config = ScanConfig {
            ping_methods: vec![MethodKind::Icmp],
            tcp_ping_ports: vec![22, 80],
            ack_ping_ports: vec![],
            arp_lookup_enabled: true,
            fallback_enabled: true,
            max_retries: 0,
            scan_timeout: "250ms".into(),
            ..ScanConfig::default()
        };
        let plan = ProbePlan::from_config(&config).unwrap();
        assert_eq!(plan.primary, vec![ProbeMethod::Icmp]);
        assert_eq!(
            plan.fallback,
            vec![ProbeMethod::TcpSyn(vec![22, 80]), ProbeMethod::Arp]
        );
        assert_eq!(plan.attempts, 1);
        assert_eq!(plan.timeout, Duration::from_millis(250));
    }

    #[test]
    fn plan_without_methods_is_rejected() {
        let config = ScanConfig::default().with_methods(&[]);
        assert_eq!(
            ProbePlan::from_config(&config).unwrap_err(),
            ConfigError::NoProbeMethods
        );
    }
}
