//! Per-Backend Metrics
//!
//! Hot-path counters (requests, successes, errors, cumulative latency) are
//! plain atomics so dispatch never contends on a lock. Derived fields
//! (average latency, error rate) are recomputed under a short exclusive lock
//! on each update; readers see either the pre- or post-update derived values,
//! never torn ones, and derived values may briefly lag the counters but never
//! exceed them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Outcome of a dispatched request, as recorded into metrics
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Request completed successfully
    Success,
    /// Request failed
    Error,
    /// Caller cancelled before completion; not counted as an error
    Cancelled,
}

/// Thread-safe metric state embedded in every backend
#[derive(Debug, Default)]
pub struct BackendMetrics {
    request_count: AtomicU64,
    success_count: AtomicU64,
    error_count: AtomicU64,
    cancelled_count: AtomicU64,
    total_latency_ms: AtomicU64,

    /// Derived fields, recomputed under this lock on each update
    derived: Mutex<DerivedMetrics>,
}

#[derive(Clone, Debug, Default)]
struct DerivedMetrics {
    avg_latency_ms: f64,
    error_rate: f64,
    loaded_models: Vec<String>,
}

impl BackendMetrics {
    /// Create zeroed metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed request
    ///
    /// Counter increments happen first (atomics), then the derived fields are
    /// recomputed from the updated counters inside the lock. Cancelled
    /// requests count toward the request total but not toward errors.
    pub fn record(&self, latency: Duration, outcome: RequestOutcome) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        match outcome {
            RequestOutcome::Success => {
                self.success_count.fetch_add(1, Ordering::Relaxed);
            }
            RequestOutcome::Error => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
            }
            RequestOutcome::Cancelled => {
                self.cancelled_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);

        let requests = self.request_count.load(Ordering::Relaxed);
        let errors = self.error_count.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);

        let mut derived = self.derived.lock();
        if requests > 0 {
            derived.avg_latency_ms = total_latency as f64 / requests as f64;
            derived.error_rate = errors as f64 / requests as f64;
        }
    }

    /// Record the set of models currently loaded on the backend
    pub fn set_loaded_models(&self, models: Vec<String>) {
        self.derived.lock().loaded_models = models;
    }

    /// Total requests dispatched
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Total successful requests
    #[must_use]
    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    /// Total failed requests
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Total cancelled requests
    #[must_use]
    pub fn cancelled_count(&self) -> u64 {
        self.cancelled_count.load(Ordering::Relaxed)
    }

    /// Recent average latency in milliseconds
    #[must_use]
    pub fn avg_latency_ms(&self) -> f64 {
        self.derived.lock().avg_latency_ms
    }

    /// Recent error rate in [0, 1]
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        self.derived.lock().error_rate
    }

    /// Consistent point-in-time snapshot
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let derived = self.derived.lock().clone();
        MetricsSnapshot {
            request_count: self.request_count.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            cancelled_count: self.cancelled_count.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
            avg_latency_ms: derived.avg_latency_ms,
            error_rate: derived.error_rate,
            loaded_models: derived.loaded_models,
        }
    }
}

/// Immutable snapshot of backend metrics
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Total requests dispatched
    pub request_count: u64,
    /// Total successes
    pub success_count: u64,
    /// Total errors
    pub error_count: u64,
    /// Total cancellations
    pub cancelled_count: u64,
    /// Cumulative latency in milliseconds
    pub total_latency_ms: u64,
    /// Average latency in milliseconds
    pub avg_latency_ms: f64,
    /// Error rate in [0, 1]
    pub error_rate: f64,
    /// Models reported loaded on the backend
    pub loaded_models: Vec<String>,
}
