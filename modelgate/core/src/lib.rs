//! Modelgate Core - Multi-Backend Inference Routing
//!
//! This crate is the front door for a heterogeneous fleet of inference
//! backends (NPU, integrated GPU, discrete GPU, CPU and hosted cloud APIs)
//! behind one uniform contract. It picks the right backend per request under
//! simultaneous quality, latency, power, thermal and per-user quota
//! constraints, then executes with bounded failure: streaming where
//! available, retrying and escalating when a response scores below the
//! confidence threshold.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Clients                                   │
//! │        framed streaming transport (length + CRC32 + JSON)         │
//! └───────────────────────────┬──────────────────────────────────────┘
//!                             │
//! ┌───────────────────────────┼──────────────────────────────────────┐
//! │                    MODELGATE CORE                                 │
//! │  ┌────────────┐  ┌────────┴───────┐  ┌──────────────────────┐    │
//! │  │ RateLimiter│  │    Session     │  │    HealthChecker     │    │
//! │  └────────────┘  └────────┬───────┘  └──────────────────────┘    │
//! │                           │                                       │
//! │  ┌────────────┐  ┌────────┴───────┐  ┌──────────────────────┐    │
//! │  │ Workload   │  │     Router     │──│     PolicyEngine     │    │
//! │  │ Detector   │──│  (+ breakers,  │  │  (budgets, battery)  │    │
//! │  │ Classifier │  │   confidence)  │  └──────────────────────┘    │
//! │  └────────────┘  └────────┬───────┘                              │
//! │                           │                                       │
//! │  ┌────────────────────────┴────────────────────────────────┐     │
//! │  │              BackendRegistry (Backend trait)            │     │
//! │  │     npu | igpu | discrete-gpu | cpu | cloud variants    │     │
//! │  └─────────────────────────────────────────────────────────┘     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Router`]: candidate selection, budget charging, breaker-protected
//!   dispatch and confidence-triggered escalation
//! - [`Backend`]: the uniform contract every dispatch target satisfies
//! - [`BackendRegistry`]: the typed set of live backends
//! - [`CircuitBreaker`] / [`RateLimiter`]: the reliability fabric
//! - [`Session`] / [`TransportServer`]: the framed streaming transport
//! - [`PolicyEngine`]: per-user energy budgets and battery-aware caps
//! - [`GatewayConfig`]: the validated configuration surface
//!
//! # No process concerns
//!
//! This crate has **zero** dependencies on CLI parsing, signal handling or
//! logging subscribers. Those live in the daemon binary; everything here is
//! library logic that can be embedded, driven by tests, or run headless.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod cancel;
pub mod config;
pub mod error;
pub mod routing;
pub mod transport;

// Re-exports for convenience
pub use backend::{
    Backend, BackendCore, BackendMetrics, BackendRegistry, Capability, CapabilitySet,
    GenerateOptions, GenerateRequest, GenerateResponse, GenerationStats, HardwareClass,
    MetricsSnapshot, ModelFilter, OllamaBackend, RequestOutcome, StreamChunk, StreamHandle,
};
pub use cancel::CancelToken;
pub use config::{EfficiencyMode, GatewayConfig};
pub use error::{
    BackendError, ConfigError, GatewayError, PipelineError, RequestError, RoutingError, WireError,
};
pub use routing::{
    Annotations, BreakerConfig, BreakerState, CircuitBreaker, Classifier, Complexity,
    ConfidenceConfig, ConfidenceEstimator, ConfidenceScore, ExecuteResult, ForwardingPolicy,
    HealthChecker, HealthReport, HealthVerdict, MediaType, PolicyEngine, RequestPriority,
    RouteDecision, Router, ThermalGate, UserTier, WorkloadDetector,
};
pub use transport::{
    RateLimitConfig, RateLimiter, RequestFrame, ResponseFrame, Session, SessionConfig,
    TransportError, TransportServer,
};
