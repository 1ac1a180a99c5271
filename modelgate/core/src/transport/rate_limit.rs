//! Ingress Rate Limiting
//!
//! Per-client-IP token buckets shed excess load before it reaches the
//! router. Buckets refill continuously at a configurable (possibly
//! fractional) rate up to a burst ceiling, are created lazily on first
//! sight of an IP, and are bulk-evicted by a background task once idle
//! longer than the expiry window.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;

// ============================================================================
// Configuration
// ============================================================================

/// Rate limiter tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether limiting is applied at all
    pub enabled: bool,
    /// Steady-state tokens per second; fractional rates are allowed
    pub rate: f64,
    /// Maximum tokens a bucket can hold
    pub burst: f64,
    /// How often the cleanup task scans for idle buckets
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Idle time after which a bucket is evicted
    #[serde(default = "default_expiry_secs")]
    pub expiry_secs: u64,
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_expiry_secs() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate: 10.0,
            burst: 20.0,
            cleanup_interval_secs: default_cleanup_interval_secs(),
            expiry_secs: default_expiry_secs(),
        }
    }
}

// ============================================================================
// Token Bucket
// ============================================================================

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl Bucket {
    fn new(burst: f64) -> Self {
        let now = Instant::now();
        Self {
            tokens: burst,
            last_refill: now,
            last_seen: now,
        }
    }

    /// Refill by elapsed time, then consume one token if available
    fn try_consume(&mut self, rate: f64, burst: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(burst);
        self.last_refill = now;
        self.last_seen = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// Per-client-IP token bucket limiter
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Create a limiter
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Whether a request from `ip` is admitted
    ///
    /// The bucket is created on first sight, its `last_seen` stamped, and
    /// one token consumed atomically under the write lock.
    pub fn allow(&self, ip: &str) -> bool {
        if !self.config.enabled {
            return true;
        }

        let mut buckets = self.buckets.write();
        let bucket = buckets
            .entry(ip.to_string())
            .or_insert_with(|| Bucket::new(self.config.burst));

        let allowed = bucket.try_consume(self.config.rate, self.config.burst);
        if !allowed {
            tracing::debug!(client = %ip, "Rate limited");
        }
        allowed
    }

    /// Number of live buckets
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }

    /// Evict buckets idle longer than the expiry window; returns how many
    pub fn cleanup(&self) -> usize {
        let expiry = Duration::from_secs(self.config.expiry_secs);
        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, b| b.last_seen.elapsed() < expiry);
        let evicted = before - buckets.len();
        if evicted > 0 {
            tracing::debug!(evicted = evicted, "Evicted idle rate-limit buckets");
        }
        evicted
    }

    /// Spawn the periodic cleanup task; the returned token stops it
    pub fn spawn_cleanup(self: std::sync::Arc<Self>) -> CancelToken {
        let stop = CancelToken::new();
        let stop_handle = stop.clone();
        let interval = Duration::from_secs(self.config.cleanup_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.cleanup();
                    }
                    () = stop_handle.cancelled() => return,
                }
            }
        });

        stop
    }
}

// ============================================================================
// Client IP Extraction
// ============================================================================

/// Resolve the client IP a request should be accounted against
///
/// Precedence behind proxies: the first element of `X-Forwarded-For`, then
/// `X-Real-IP`, then the socket peer address with any port stripped.
/// Elements are whitespace-trimmed and empty elements ignored.
#[must_use]
pub fn extract_client_ip(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    peer_addr: &str,
) -> String {
    if let Some(xff) = forwarded_for {
        if let Some(first) = xff.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }

    if let Some(real) = real_ip {
        let trimmed = real.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    peer_host(peer_addr)
}

/// Strip the port from a socket address string
///
/// Handles `1.2.3.4:80`, `[::1]:80`, and bare hosts.
fn peer_host(peer: &str) -> String {
    if let Some(stripped) = peer.strip_prefix('[') {
        // Bracketed IPv6 with port
        if let Some(end) = stripped.find(']') {
            return stripped[..end].to_string();
        }
    }
    // IPv6 without brackets has multiple colons; leave it intact
    if peer.matches(':').count() > 1 {
        return peer.to_string();
    }
    peer.split(':').next().unwrap_or(peer).to_string()
}
