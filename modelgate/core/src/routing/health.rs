//! Health Checking
//!
//! Aggregates backend health for the three boundary endpoints:
//!
//! - **Liveness**: the process can respond at all
//! - **Readiness**: at least one backend is healthy
//! - **Deep**: every backend's own probe, run concurrently under a bounded
//!   deadline, with per-backend latency and error detail
//!
//! `perform_check` caches its aggregate so callers can read the last result
//! without triggering a new round of probes. A background loop drives the
//! deep check periodically and keeps each backend's health flag current.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::backend::BackendRegistry;
use crate::cancel::CancelToken;

// ============================================================================
// Report Types
// ============================================================================

/// Aggregate verdict of a deep check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthVerdict {
    /// Every backend passed
    Healthy,
    /// Some passed, some failed
    Degraded,
    /// Nothing passed
    Unhealthy,
}

/// One backend's deep-check outcome
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendProbe {
    /// Backend id
    pub backend_id: String,
    /// Whether the probe passed
    pub healthy: bool,
    /// Probe round-trip in milliseconds
    pub latency_ms: u64,
    /// Error text when the probe failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full deep-check report
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Aggregate verdict
    pub verdict: HealthVerdict,
    /// Healthy backend count
    pub healthy: usize,
    /// Total backend count
    pub total: usize,
    /// Per-backend probe results
    pub probes: Vec<BackendProbe>,
}

/// Readiness payload: the cheap aggregate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessReport {
    /// Whether at least one backend is healthy
    pub ready: bool,
    /// Healthy backend count
    pub healthy: usize,
    /// Total backend count
    pub total: usize,
}

// ============================================================================
// Health Checker
// ============================================================================

/// Periodic health prober over the registry
pub struct HealthChecker {
    registry: Arc<BackendRegistry>,
    probe_deadline: Duration,
    last_report: RwLock<Option<HealthReport>>,
}

impl HealthChecker {
    /// Create a checker with a 5 second per-probe deadline
    #[must_use]
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self::with_deadline(registry, Duration::from_secs(5))
    }

    /// Create a checker with an explicit per-probe deadline
    #[must_use]
    pub fn with_deadline(registry: Arc<BackendRegistry>, probe_deadline: Duration) -> Self {
        Self {
            registry,
            probe_deadline,
            last_report: RwLock::new(None),
        }
    }

    /// Liveness: true whenever the process can answer
    #[must_use]
    pub fn liveness(&self) -> bool {
        true
    }

    /// Readiness: at least one backend currently flagged healthy
    #[must_use]
    pub fn readiness(&self) -> ReadinessReport {
        let total = self.registry.len();
        let healthy = self.registry.healthy_count();
        ReadinessReport {
            ready: healthy >= 1,
            healthy,
            total,
        }
    }

    /// The most recent deep-check report, without probing
    #[must_use]
    pub fn cached_report(&self) -> Option<HealthReport> {
        self.last_report.read().clone()
    }

    /// Run every backend's probe concurrently and cache the aggregate
    pub async fn perform_check(&self) -> HealthReport {
        let backends = self.registry.snapshot();
        let total = backends.len();

        let probes = futures::future::join_all(backends.into_iter().map(|backend| {
            let deadline = self.probe_deadline;
            async move {
                let started = std::time::Instant::now();
                let outcome = tokio::time::timeout(deadline, backend.health_check()).await;

                match outcome {
                    Ok(Ok(latency)) => BackendProbe {
                        backend_id: backend.id().to_string(),
                        healthy: true,
                        latency_ms: latency.as_millis() as u64,
                        error: None,
                    },
                    Ok(Err(e)) => BackendProbe {
                        backend_id: backend.id().to_string(),
                        healthy: false,
                        latency_ms: started.elapsed().as_millis() as u64,
                        error: Some(e.to_string()),
                    },
                    Err(_) => {
                        // Probe blew the deadline; the flag must not stay stale
                        backend.core().set_healthy(false);
                        BackendProbe {
                            backend_id: backend.id().to_string(),
                            healthy: false,
                            latency_ms: deadline.as_millis() as u64,
                            error: Some(format!(
                                "health probe exceeded {}ms deadline",
                                deadline.as_millis()
                            )),
                        }
                    }
                }
            }
        }))
        .await;

        let healthy = probes.iter().filter(|p| p.healthy).count();
        let verdict = if total == 0 || healthy == 0 {
            HealthVerdict::Unhealthy
        } else if healthy == total {
            HealthVerdict::Healthy
        } else {
            HealthVerdict::Degraded
        };

        let report = HealthReport {
            verdict,
            healthy,
            total,
            probes,
        };

        *self.last_report.write() = Some(report.clone());

        tracing::debug!(
            healthy = healthy,
            total = total,
            verdict = ?verdict,
            "Deep health check complete"
        );
        report
    }

    /// Spawn the periodic probe loop; the returned token stops it
    pub fn spawn_loop(self: Arc<Self>, interval: Duration) -> CancelToken {
        let stop = CancelToken::new();
        let stop_handle = stop.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.perform_check().await;
                        if report.verdict != HealthVerdict::Healthy {
                            tracing::warn!(
                                healthy = report.healthy,
                                total = report.total,
                                "Backend fleet degraded"
                            );
                        }
                    }
                    () = stop_handle.cancelled() => {
                        tracing::debug!("Health check loop stopped");
                        return;
                    }
                }
            }
        });

        stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::test_utils::MockBackend;
    use std::sync::Arc;

    fn registry_with(backends: Vec<MockBackend>) -> Arc<BackendRegistry> {
        let registry = Arc::new(BackendRegistry::new());
        for b in backends {
            registry.register(Arc::new(b)).unwrap();
        }
        registry
    }

    #[test]
    fn test_liveness_always_true() {
        let checker = HealthChecker::new(registry_with(vec![]));
        assert!(checker.liveness());
    }

    #[test]
    fn test_readiness_needs_one_healthy() {
        let registry = registry_with(vec![MockBackend::healthy("a"), MockBackend::healthy("b")]);
        let checker = HealthChecker::new(registry.clone());

        let report = checker.readiness();
        assert!(report.ready);
        assert_eq!(report.healthy, 2);
        assert_eq!(report.total, 2);

        registry.get("a").unwrap().core().set_healthy(false);
        registry.get("b").unwrap().core().set_healthy(false);
        let report = checker.readiness();
        assert!(!report.ready);
        assert_eq!(report.healthy, 0);
    }

    #[tokio::test]
    async fn test_deep_check_all_healthy() {
        let registry = registry_with(vec![MockBackend::healthy("a"), MockBackend::healthy("b")]);
        let checker = HealthChecker::new(registry);

        let report = checker.perform_check().await;
        assert_eq!(report.verdict, HealthVerdict::Healthy);
        assert_eq!(report.healthy, 2);
        assert_eq!(report.probes.len(), 2);
        assert!(report.probes.iter().all(|p| p.error.is_none()));
    }

    #[tokio::test]
    async fn test_deep_check_degraded_and_unhealthy() {
        let registry = registry_with(vec![MockBackend::healthy("a"), MockBackend::failing("b")]);
        let checker = HealthChecker::new(registry);

        let report = checker.perform_check().await;
        assert_eq!(report.verdict, HealthVerdict::Degraded);
        let failed = report.probes.iter().find(|p| p.backend_id == "b").unwrap();
        assert!(!failed.healthy);
        assert!(failed.error.as_ref().unwrap().contains("transport"));

        let registry = registry_with(vec![MockBackend::failing("only")]);
        let checker = HealthChecker::new(registry);
        let report = checker.perform_check().await;
        assert_eq!(report.verdict, HealthVerdict::Unhealthy);
    }

    #[tokio::test]
    async fn test_deep_check_empty_registry_unhealthy() {
        let checker = HealthChecker::new(registry_with(vec![]));
        let report = checker.perform_check().await;
        assert_eq!(report.verdict, HealthVerdict::Unhealthy);
        assert_eq!(report.total, 0);
    }

    #[tokio::test]
    async fn test_deep_check_deadline() {
        let slow = MockBackend::healthy("slow").with_delay(Duration::from_secs(30));
        let registry = registry_with(vec![slow]);
        let checker = HealthChecker::with_deadline(registry.clone(), Duration::from_millis(20));

        let report = checker.perform_check().await;
        let probe = &report.probes[0];
        assert!(!probe.healthy);
        assert!(probe.error.as_ref().unwrap().contains("deadline"));
        assert!(!registry.get("slow").unwrap().is_healthy());
    }

    #[tokio::test]
    async fn test_cached_report() {
        let registry = registry_with(vec![MockBackend::healthy("a")]);
        let checker = HealthChecker::new(registry);

        assert!(checker.cached_report().is_none());
        checker.perform_check().await;

        let cached = checker.cached_report().unwrap();
        assert_eq!(cached.verdict, HealthVerdict::Healthy);
        assert_eq!(cached.total, 1);
    }

    #[tokio::test]
    async fn test_probe_failure_flips_flag_for_readiness() {
        let registry = registry_with(vec![MockBackend::failing("a")]);
        let checker = HealthChecker::new(registry);

        // Flag starts optimistic
        assert!(checker.readiness().ready);

        checker.perform_check().await;
        assert!(!checker.readiness().ready);
    }

    #[tokio::test]
    async fn test_spawn_loop_stops_on_cancel() {
        let registry = registry_with(vec![MockBackend::healthy("a")]);
        let checker = Arc::new(HealthChecker::new(registry));

        let stop = checker.clone().spawn_loop(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(checker.cached_report().is_some());

        stop.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
