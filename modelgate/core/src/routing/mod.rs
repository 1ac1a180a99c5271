//! Request Routing Pipeline
//!
//! Everything between an accepted request and a backend invocation:
//!
//! ```text
//! +-------------------+
//! | WorkloadDetector  |  <-- prompt -> media type + routing hints
//! +---------+---------+
//!           |
//!           v
//! +-------------------+
//! |    Classifier     |  <-- complexity bucket + backend recommendation
//! +---------+---------+
//!           |
//!           v
//! +-------------------+     +--------------+
//! |      Router       | --> | PolicyEngine |  (budget check-and-deduct)
//! +---------+---------+     +--------------+
//!           |
//!           v
//! +-------------------+     +--------------+
//! |  CircuitBreaker   | --> |   Backend    |
//! +---------+---------+     +--------------+
//!           |
//!           v
//! +-------------------+
//! | Confidence score  |  <-- below threshold -> escalation chain
//! +-------------------+
//! ```
//!
//! The [`HealthChecker`] runs beside the pipeline, keeping each backend's
//! health flag current for the router's candidate filter.

pub mod annotations;
pub mod breaker;
pub mod classify;
pub mod confidence;
pub mod health;
pub mod policy;
pub mod router;
pub mod workload;

#[cfg(test)]
pub mod test_utils;

pub use annotations::{Annotations, MediaType, RequestPriority};
pub use breaker::{BreakerConfig, BreakerSet, BreakerState, CircuitBreaker};
pub use classify::{Classifier, Complexity, LlmClassifier};
pub use confidence::{ConfidenceConfig, ConfidenceEstimator, ConfidenceScore};
pub use health::{HealthChecker, HealthReport, HealthVerdict, ReadinessReport};
pub use policy::{
    estimate_energy_wh, BackendRecommendation, PolicyEngine, PowerBudget, PowerSource, PowerState,
    UserTier,
};
pub use router::{ExecuteResult, ForwardingPolicy, RouteDecision, Router, ThermalGate};
pub use workload::{RoutingHints, WorkloadDetector, WorkloadProfile};
