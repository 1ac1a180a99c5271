//! Error Taxonomy
//!
//! Every error that crosses a component boundary carries a numeric code from
//! a fixed family, a message, and optional structured context. The families:
//!
//! ```text
//! 1xxx  backend   (no backends, unhealthy, timeout, capacity, unsupported, breaker)
//! 2xxx  routing   (routing failed, constraints, thermal)
//! 3xxx  request   (invalid request/model/prompt/params)
//! 4xxx  config    (invalid, not found, parse failed) - fatal at startup
//! 5xxx  pipeline  (not found, execution failed, invalid)
//! ```
//!
//! Recovery policy is keyed off the kind, not the message: breaker-open,
//! unhealthy and unsupported errors advance the escalation chain; timeout and
//! at-capacity permit a retry against the same backend; everything else
//! surfaces to the caller with its context intact.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Backend Errors (1xxx)
// ============================================================================

/// Errors raised by backends and the dispatch layer around them
#[derive(Clone, Debug, Error, PartialEq)]
pub enum BackendError {
    /// No backend satisfied the routing constraints
    #[error("no backends available ({healthy} healthy of {total}): {constraints}")]
    NoBackendsAvailable {
        /// Total registered backends
        total: usize,
        /// Backends currently healthy
        healthy: usize,
        /// Human-readable description of the active constraints
        constraints: String,
    },

    /// Backend is registered but marked unhealthy
    #[error("backend {backend_id} is unhealthy")]
    Unhealthy {
        /// The unhealthy backend
        backend_id: String,
    },

    /// The request exceeded its deadline
    #[error("backend {backend_id} timed out after {elapsed_ms}ms")]
    Timeout {
        /// The backend that timed out
        backend_id: String,
        /// Time spent before giving up
        elapsed_ms: u64,
    },

    /// Backend refused the request because it is saturated
    #[error("backend {backend_id} at capacity")]
    AtCapacity {
        /// The saturated backend
        backend_id: String,
    },

    /// The backend does not support the requested model or operation
    #[error("backend {backend_id} does not support {what}")]
    Unsupported {
        /// The backend that rejected the request
        backend_id: String,
        /// What was rejected (model name or operation)
        what: String,
    },

    /// Circuit breaker is open for this backend
    #[error("circuit breaker open for {backend_id}, retry in {retry_after_ms}ms")]
    BreakerOpen {
        /// The protected backend
        backend_id: String,
        /// Time remaining until the breaker will probe again
        retry_after_ms: u64,
    },

    /// Connection or process-level failure reaching the backend
    #[error("transport failure for {backend_id}: {detail}")]
    Transport {
        /// The unreachable backend
        backend_id: String,
        /// Underlying error text
        detail: String,
    },

    /// Backend answered with a protocol-level error (non-2xx with body)
    #[error("backend {backend_id} protocol error {status}: {body}")]
    Protocol {
        /// The backend that errored
        backend_id: String,
        /// HTTP-style status code
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// The caller cancelled the request
    #[error("request cancelled while calling {backend_id}")]
    Cancelled {
        /// The backend the call was in flight to
        backend_id: String,
    },
}

impl BackendError {
    /// Numeric wire code for this error
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::NoBackendsAvailable { .. } => 1001,
            Self::Unhealthy { .. } => 1002,
            Self::Timeout { .. } => 1003,
            Self::AtCapacity { .. } => 1004,
            Self::Unsupported { .. } => 1005,
            Self::BreakerOpen { .. } => 1006,
            Self::Transport { .. } => 1007,
            Self::Protocol { .. } => 1008,
            Self::Cancelled { .. } => 1009,
        }
    }

    /// Whether the escalation chain should skip to the next backend
    /// instead of surfacing this error
    #[must_use]
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            Self::BreakerOpen { .. }
                | Self::Unhealthy { .. }
                | Self::Unsupported { .. }
                | Self::Transport { .. }
        )
    }

    /// Whether a retry against the same backend is permitted
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::AtCapacity { .. })
    }

    /// Whether this error represents caller cancellation
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

// ============================================================================
// Routing Errors (2xxx)
// ============================================================================

/// Errors raised by the routing pipeline itself
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RoutingError {
    /// Routing failed for a reason other than constraint filtering
    #[error("routing failed: {detail}")]
    Failed {
        /// What went wrong
        detail: String,
    },

    /// No backend matched the request's requirements
    #[error("no backend matches request (tried: {tried:?})")]
    NoMatchingBackend {
        /// Backend ids that were considered and rejected
        tried: Vec<String>,
    },

    /// Explicit constraints could not be met
    #[error("constraints not met: {constraints}")]
    ConstraintsNotMet {
        /// The constraints that failed
        constraints: String,
    },

    /// Thermal policy blocked dispatch
    #[error("thermal limit exceeded on {backend_id}")]
    ThermalLimitExceeded {
        /// The backend blocked by thermal state
        backend_id: String,
    },
}

impl RoutingError {
    /// Numeric wire code for this error
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::Failed { .. } => 2001,
            Self::NoMatchingBackend { .. } => 2002,
            Self::ConstraintsNotMet { .. } => 2003,
            Self::ThermalLimitExceeded { .. } => 2004,
        }
    }
}

// ============================================================================
// Request Errors (3xxx)
// ============================================================================

/// Client-side request validation errors
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RequestError {
    /// The request frame was malformed
    #[error("invalid request: {detail}")]
    InvalidRequest {
        /// What was malformed
        detail: String,
    },

    /// Unknown or malformed model name
    #[error("invalid model: {model}")]
    InvalidModel {
        /// The rejected model name
        model: String,
    },

    /// Empty or otherwise unusable prompt
    #[error("invalid prompt: {detail}")]
    InvalidPrompt {
        /// Why the prompt was rejected
        detail: String,
    },

    /// Explicitly requested backend id does not exist
    #[error("invalid backend id: {backend_id}")]
    InvalidBackendId {
        /// The unknown backend id
        backend_id: String,
    },

    /// Request payload exceeded size limits
    #[error("request too large: {size} bytes (max {max})")]
    TooLarge {
        /// Actual size
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Generation parameters out of range
    #[error("invalid params: {detail}")]
    InvalidParams {
        /// Which parameter and why
        detail: String,
    },
}

impl RequestError {
    /// Numeric wire code for this error
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } => 3001,
            Self::InvalidModel { .. } => 3002,
            Self::InvalidPrompt { .. } => 3003,
            Self::InvalidBackendId { .. } => 3004,
            Self::TooLarge { .. } => 3005,
            Self::InvalidParams { .. } => 3006,
        }
    }
}

// ============================================================================
// Config Errors (4xxx)
// ============================================================================

/// Configuration errors, fatal at startup
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A validation rule failed
    #[error("invalid config: {detail}")]
    Invalid {
        /// Which rule and why
        detail: String,
    },

    /// The config file could not be located
    #[error("config file not found: {path}")]
    NotFound {
        /// The path that was tried
        path: String,
    },

    /// The config file could not be parsed
    #[error("config parse failed: {detail}")]
    ParseFailed {
        /// Parser error text
        detail: String,
    },
}

impl ConfigError {
    /// Numeric wire code for this error
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::Invalid { .. } => 4001,
            Self::NotFound { .. } => 4002,
            Self::ParseFailed { .. } => 4003,
        }
    }
}

// ============================================================================
// Pipeline / Policy Errors (5xxx)
// ============================================================================

/// Pipeline and policy errors
#[derive(Clone, Debug, Error, PartialEq)]
pub enum PipelineError {
    /// A referenced entity does not exist
    #[error("not found: {what}")]
    NotFound {
        /// What was missing
        what: String,
    },

    /// A pipeline stage failed to execute
    #[error("execution failed: {detail}")]
    ExecutionFailed {
        /// What failed
        detail: String,
    },

    /// A pipeline stage received invalid input
    #[error("invalid pipeline input: {detail}")]
    Invalid {
        /// Why the input was rejected
        detail: String,
    },

    /// Per-user daily energy budget exhausted
    #[error(
        "daily energy budget exceeded for {user}: used {used_wh:.2}Wh of {budget_wh:.2}Wh, \
         suggested backend: {suggested}"
    )]
    DailyEnergyExceeded {
        /// The user whose budget is exhausted
        user: String,
        /// Energy used so far today
        used_wh: f64,
        /// The daily budget
        budget_wh: f64,
        /// Cheaper backend the caller may retry with
        suggested: String,
    },

    /// Per-user hourly NVIDIA quota exhausted
    #[error(
        "nvidia quota exceeded for {user}: {used} of {quota} this hour, resets in {}s, \
         suggested backend: {suggested}", reset_in.as_secs()
    )]
    NvidiaQuotaExceeded {
        /// The user whose quota is exhausted
        user: String,
        /// Requests used this hour
        used: u32,
        /// Hourly quota
        quota: u32,
        /// Time until the hourly window rolls
        reset_in: Duration,
        /// Cheaper backend the caller may retry with
        suggested: String,
    },

    /// Rate limiter denied the request
    #[error("rate limited: {client}")]
    RateLimited {
        /// The throttled client address
        client: String,
    },
}

impl PipelineError {
    /// Numeric wire code for this error
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 5001,
            Self::ExecutionFailed { .. } => 5002,
            Self::Invalid { .. } => 5003,
            Self::DailyEnergyExceeded { .. } => 5004,
            Self::NvidiaQuotaExceeded { .. } => 5005,
            Self::RateLimited { .. } => 5006,
        }
    }
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Union of all component errors, used at the router and transport boundary
#[derive(Clone, Debug, Error, PartialEq)]
pub enum GatewayError {
    /// Backend-family error (1xxx)
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Routing-family error (2xxx)
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// Request-family error (3xxx)
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Config-family error (4xxx)
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Pipeline-family error (5xxx)
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl GatewayError {
    /// Numeric wire code for this error
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::Backend(e) => e.code(),
            Self::Routing(e) => e.code(),
            Self::Request(e) => e.code(),
            Self::Config(e) => e.code(),
            Self::Pipeline(e) => e.code(),
        }
    }

    /// Convert to the structured wire representation
    #[must_use]
    pub fn to_wire(&self) -> WireError {
        let mut context = HashMap::new();
        match self {
            Self::Backend(BackendError::NoBackendsAvailable {
                total,
                healthy,
                constraints,
            }) => {
                context.insert("total".to_string(), total.to_string());
                context.insert("healthy".to_string(), healthy.to_string());
                context.insert("constraints".to_string(), constraints.clone());
            }
            Self::Backend(BackendError::BreakerOpen {
                backend_id,
                retry_after_ms,
            }) => {
                context.insert("backend_id".to_string(), backend_id.clone());
                context.insert("retry_after_ms".to_string(), retry_after_ms.to_string());
            }
            Self::Backend(BackendError::Timeout {
                backend_id,
                elapsed_ms,
            }) => {
                context.insert("backend_id".to_string(), backend_id.clone());
                context.insert("elapsed_ms".to_string(), elapsed_ms.to_string());
            }
            Self::Pipeline(PipelineError::DailyEnergyExceeded {
                user,
                used_wh,
                budget_wh,
                suggested,
            }) => {
                context.insert("user".to_string(), user.clone());
                context.insert("used_wh".to_string(), format!("{used_wh:.3}"));
                context.insert("budget_wh".to_string(), format!("{budget_wh:.3}"));
                context.insert("suggested_backend".to_string(), suggested.clone());
            }
            Self::Pipeline(PipelineError::NvidiaQuotaExceeded {
                user,
                used,
                quota,
                reset_in,
                suggested,
            }) => {
                context.insert("user".to_string(), user.clone());
                context.insert("used".to_string(), used.to_string());
                context.insert("quota".to_string(), quota.to_string());
                context.insert("reset_in_secs".to_string(), reset_in.as_secs().to_string());
                context.insert("suggested_backend".to_string(), suggested.clone());
            }
            Self::Routing(RoutingError::NoMatchingBackend { tried }) => {
                context.insert("tried".to_string(), tried.join(","));
            }
            _ => {}
        }

        WireError {
            code: self.code(),
            message: self.to_string(),
            context: if context.is_empty() {
                None
            } else {
                Some(context)
            },
        }
    }
}

/// Structured error as it appears on the wire
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Numeric code from one of the fixed families
    pub code: u16,
    /// Human-readable message
    pub message: String,
    /// Optional structured context (ids, counts, thresholds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_families() {
        let e = BackendError::Unhealthy {
            backend_id: "npu-0".to_string(),
        };
        assert_eq!(e.code() / 1000, 1);

        let e = RoutingError::Failed {
            detail: "x".to_string(),
        };
        assert_eq!(e.code() / 1000, 2);

        let e = RequestError::InvalidModel {
            model: "x".to_string(),
        };
        assert_eq!(e.code() / 1000, 3);

        let e = ConfigError::NotFound {
            path: "/etc/x".to_string(),
        };
        assert_eq!(e.code() / 1000, 4);

        let e = PipelineError::NotFound {
            what: "x".to_string(),
        };
        assert_eq!(e.code() / 1000, 5);
    }

    #[test]
    fn test_skippable_vs_retryable() {
        let open = BackendError::BreakerOpen {
            backend_id: "gpu-0".to_string(),
            retry_after_ms: 500,
        };
        assert!(open.is_skippable());
        assert!(!open.is_retryable());

        let timeout = BackendError::Timeout {
            backend_id: "gpu-0".to_string(),
            elapsed_ms: 30_000,
        };
        assert!(timeout.is_retryable());
        assert!(!timeout.is_skippable());

        let cancelled = BackendError::Cancelled {
            backend_id: "gpu-0".to_string(),
        };
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_skippable());
    }

    #[test]
    fn test_wire_error_context() {
        let e: GatewayError = BackendError::NoBackendsAvailable {
            total: 4,
            healthy: 0,
            constraints: "media_type=image".to_string(),
        }
        .into();

        let wire = e.to_wire();
        assert_eq!(wire.code, 1001);
        let ctx = wire.context.unwrap();
        assert_eq!(ctx.get("total").unwrap(), "4");
        assert_eq!(ctx.get("healthy").unwrap(), "0");
    }

    #[test]
    fn test_wire_error_serializes_without_empty_context() {
        let e: GatewayError = RequestError::InvalidPrompt {
            detail: "empty".to_string(),
        }
        .into();
        let json = serde_json::to_string(&e.to_wire()).unwrap();
        assert!(!json.contains("context"));
        assert!(json.contains("3003"));
    }

    #[test]
    fn test_budget_error_carries_suggestion() {
        let e: GatewayError = PipelineError::DailyEnergyExceeded {
            user: "alice".to_string(),
            used_wh: 9.9,
            budget_wh: 10.0,
            suggested: "npu-0".to_string(),
        }
        .into();

        let wire = e.to_wire();
        assert_eq!(wire.code, 5004);
        assert_eq!(
            wire.context.unwrap().get("suggested_backend").unwrap(),
            "npu-0"
        );
    }
}
