//! Circuit Breaker
//!
//! Per-backend failure gate. Repeated failures trip the breaker open;
//! while open, calls are rejected without touching the backend; after the
//! cooldown the next call probes through a half-open state.
//!
//! ```text
//! +--------+   max_failures    +------+   timeout elapsed,   +-----------+
//! | Closed | ----------------> | Open | ---- next call ----> | Half-Open |
//! +--------+                   +------+                      +-----------+
//!     ^                           ^                                |
//!     |     success_target        |          1 failure             |
//!     +---------------------------+--------------------------------+
//! ```
//!
//! # Locking
//!
//! State inspection and mutation are serialized behind one mutex per
//! breaker, but the protected call runs *outside* the critical section:
//! callers acquire a pass, run the call, then report the outcome. Calls
//! never block each other on the call itself.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::BackendError;

// ============================================================================
// Configuration
// ============================================================================

/// Breaker tuning knobs
#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
    /// Consecutive failures in closed state before tripping open
    pub max_failures: u32,
    /// Cooldown before an open breaker allows a probe call
    pub timeout: Duration,
    /// Successes required in half-open before closing
    pub half_open_success_target: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout: Duration::from_secs(30),
            half_open_success_target: 2,
        }
    }
}

// ============================================================================
// Breaker State
// ============================================================================

/// Observable breaker state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through
    #[default]
    Closed,
    /// Calls rejected until the cooldown elapses
    Open,
    /// Probing: limited calls allowed, one failure reopens
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: u32,
    successes: u32,
    last_failure_time: Option<Instant>,
    last_state_change: Instant,
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Failure gate for one backend
#[derive(Debug)]
pub struct CircuitBreaker {
    backend_id: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker for `backend_id`
    pub fn new(backend_id: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            backend_id: backend_id.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                successes: 0,
                last_failure_time: None,
                last_state_change: Instant::now(),
            }),
        }
    }

    /// The backend this breaker protects
    #[must_use]
    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Current state; an elapsed open cooldown still reads as open until the
    /// next call transitions it
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Consecutive failure count
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.inner.lock().failures
    }

    /// Half-open success count
    #[must_use]
    pub fn successes(&self) -> u32 {
        self.inner.lock().successes
    }

    /// How long the breaker has been in its current state
    #[must_use]
    pub fn time_in_state(&self) -> Duration {
        self.inner.lock().last_state_change.elapsed()
    }

    /// Request permission to call the backend
    ///
    /// Open breakers reject immediately, reporting the wait remaining. An
    /// open breaker whose cooldown has elapsed transitions to half-open
    /// (counters zeroed) and admits this call as the probe. The caller must
    /// report the outcome with [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn try_acquire(&self) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();

        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let since_failure = inner
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);

                if since_failure >= self.config.timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.last_state_change = Instant::now();
                    tracing::info!(backend = %self.backend_id, "Circuit breaker half-open, probing");
                    Ok(())
                } else {
                    let remaining = self.config.timeout - since_failure;
                    Err(BackendError::BreakerOpen {
                        backend_id: self.backend_id.clone(),
                        retry_after_ms: remaining.as_millis() as u64,
                    })
                }
            }
        }
    }

    /// Report a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.half_open_success_target {
                    inner.state = BreakerState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.last_state_change = Instant::now();
                    tracing::info!(backend = %self.backend_id, "Circuit breaker closed");
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Report a failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure_time = Some(Instant::now());

        match inner.state {
            BreakerState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.max_failures {
                    inner.state = BreakerState::Open;
                    inner.last_state_change = Instant::now();
                    tracing::warn!(
                        backend = %self.backend_id,
                        failures = inner.failures,
                        "Circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.successes = 0;
                inner.last_state_change = Instant::now();
                tracing::warn!(backend = %self.backend_id, "Circuit breaker reopened from half-open");
            }
            BreakerState::Open => {}
        }
    }

    /// Administrative reset back to closed with zeroed counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failures = 0;
        inner.successes = 0;
        inner.last_state_change = Instant::now();
        tracing::info!(backend = %self.backend_id, "Circuit breaker manually reset");
    }

    /// Whether a call would currently be rejected (no state transition)
    #[must_use]
    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock();
        if inner.state != BreakerState::Open {
            return false;
        }
        // An elapsed cooldown means the next call will be admitted
        inner
            .last_failure_time
            .map(|t| t.elapsed() < self.config.timeout)
            .unwrap_or(false)
    }
}

// ============================================================================
// Breaker Set
// ============================================================================

/// Lazily-created breakers keyed by backend id
#[derive(Debug, Default)]
pub struct BreakerSet {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: BreakerConfig,
}

impl BreakerSet {
    /// Create a set with default config for new breakers
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// Get or create the breaker for `backend_id`
    pub fn get(&self, backend_id: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(backend_id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(backend_id, self.config)))
            .clone()
    }

    /// Whether the breaker for `backend_id` currently rejects calls
    #[must_use]
    pub fn is_open(&self, backend_id: &str) -> bool {
        self.breakers
            .get(backend_id)
            .is_some_and(|b| b.is_open())
    }

    /// Reset every breaker to closed
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    /// Number of breakers created so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breakers exist yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            max_failures: 3,
            timeout: Duration::from_millis(100),
            half_open_success_target: 2,
        }
    }

    #[test]
    fn test_starts_closed() {
        let breaker = CircuitBreaker::new("a", fast_config());
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_acquire().is_ok());
        assert!(breaker.time_in_state() < Duration::from_secs(1));
    }

    #[test]
    fn test_opens_after_max_failures() {
        let breaker = CircuitBreaker::new("a", fast_config());

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        let err = breaker.try_acquire().unwrap_err();
        match err {
            BackendError::BreakerOpen {
                backend_id,
                retry_after_ms,
            } => {
                assert_eq!(backend_id, "a");
                assert!(retry_after_ms <= 100);
            }
            other => panic!("expected BreakerOpen, got {other:?}"),
        }
    }

    #[test]
    fn test_success_resets_failure_count_in_closed() {
        let breaker = CircuitBreaker::new("a", fast_config());

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failures(), 0);

        // Needs the full run of failures again to open
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_after_timeout_then_closes() {
        let breaker = CircuitBreaker::new("a", fast_config());

        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        // Rejected inside the cooldown window
        std::thread::sleep(Duration::from_millis(50));
        assert!(breaker.try_acquire().is_err());

        // After the cooldown, the next call transitions and is admitted
        std::thread::sleep(Duration::from_millis(100));
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert_eq!(breaker.successes(), 1);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("a", fast_config());

        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(120));
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn test_never_closed_to_half_open_directly() {
        let breaker = CircuitBreaker::new("a", fast_config());

        // Successes in closed state never produce half-open
        for _ in 0..10 {
            breaker.record_success();
            assert_eq!(breaker.state(), BreakerState::Closed);
        }
    }

    #[test]
    fn test_manual_reset() {
        let breaker = CircuitBreaker::new("a", fast_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failures(), 0);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn test_is_open_reflects_elapsed_cooldown() {
        let breaker = CircuitBreaker::new("a", fast_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(breaker.is_open());

        std::thread::sleep(Duration::from_millis(120));
        // Cooldown elapsed: the breaker will admit the next call, so it no
        // longer reports open for filtering purposes
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_breaker_set_lazy_creation() {
        let set = BreakerSet::new(fast_config());
        assert!(set.is_empty());

        let a = set.get("a");
        let a2 = set.get("a");
        assert_eq!(set.len(), 1);

        // Same underlying breaker
        a.record_failure();
        assert_eq!(a2.failures(), 1);
    }

    #[test]
    fn test_breaker_set_is_open() {
        let set = BreakerSet::new(fast_config());
        assert!(!set.is_open("missing"));

        let a = set.get("a");
        for _ in 0..3 {
            a.record_failure();
        }
        assert!(set.is_open("a"));

        set.reset_all();
        assert!(!set.is_open("a"));
    }
}
