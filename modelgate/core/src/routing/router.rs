//! Request Router
//!
//! Entry point for dispatch. Filters the registry down to viable candidates
//! (health, circuit state, capability, model support, power and latency
//! ceilings), scores them, charges the power budget, and executes through the
//! per-backend circuit breaker. When forwarding is enabled, low-confidence
//! responses escalate across an ordered backend chain.
//!
//! # Decision Flow
//!
//! ```text
//! 1. Filter registry by health, breaker, capability, model, power, latency
//! 2. Score candidates: priority desc, then latency or power preference
//! 3. Charge the user's power budget (downgrade on budget failure)
//! 4. Invoke through the circuit breaker
//! 5. Score confidence; below threshold, walk the escalation chain
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::annotations::{Annotations, MediaType};
use super::breaker::{BreakerConfig, BreakerSet};
use super::classify::Classifier;
use super::confidence::{ConfidenceEstimator, ConfidenceScore};
use super::policy::{estimate_energy_wh, PolicyEngine, UserTier};
use super::workload::WorkloadDetector;
use crate::backend::{
    Backend, BackendRegistry, Capability, GenerateRequest, GenerateResponse, RequestOutcome,
    StreamHandle,
};
use crate::cancel::CancelToken;
use crate::error::{BackendError, GatewayError, RoutingError};

// ============================================================================
// Forwarding Policy
// ============================================================================

/// Controls confidence-triggered escalation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForwardingPolicy {
    /// Whether escalation runs at all
    pub enabled: bool,
    /// Responses scoring below this escalate
    pub min_confidence: f64,
    /// Maximum escalation attempts after the primary
    pub max_retries: u32,
    /// Ordered backend ids to escalate across
    pub escalation_path: Vec<String>,
    /// Skip thermally-blocked backends while escalating
    pub respect_thermal_limits: bool,
    /// On exhaustion, return the best-scoring attempt instead of the error
    pub return_best_attempt: bool,
}

impl Default for ForwardingPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            min_confidence: 0.7,
            max_retries: 2,
            escalation_path: Vec::new(),
            respect_thermal_limits: true,
            return_best_attempt: true,
        }
    }
}

// ============================================================================
// Thermal Gate
// ============================================================================

/// Thermal veto over high-power backends
///
/// The temperature sensor loop lives outside this crate; whatever reads the
/// silicon flips [`set_over_limit`](Self::set_over_limit) when the critical
/// threshold trips. While over limit, backends drawing more than the
/// pass-through floor are skipped during escalation.
#[derive(Debug)]
pub struct ThermalGate {
    enabled: bool,
    over_limit: AtomicBool,
    /// Backends at or below this draw pass even while over limit
    pass_through_watts: f64,
}

impl ThermalGate {
    /// Create a gate; `enabled = false` never blocks anything
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            over_limit: AtomicBool::new(false),
            pass_through_watts: 15.0,
        }
    }

    /// Record whether the platform is over its thermal limit
    pub fn set_over_limit(&self, over: bool) {
        self.over_limit.store(over, Ordering::Release);
    }

    /// Whether dispatch to a backend of this power draw is vetoed
    #[must_use]
    pub fn blocks(&self, power_watts: f64) -> bool {
        self.enabled
            && self.over_limit.load(Ordering::Acquire)
            && power_watts > self.pass_through_watts
    }
}

impl Default for ThermalGate {
    fn default() -> Self {
        Self::new(false)
    }
}

// ============================================================================
// Routing Decision
// ============================================================================

/// Outcome of candidate selection
#[derive(Clone, Debug)]
pub struct RouteDecision {
    /// The selected backend id
    pub backend_id: String,
    /// Candidate ids that survived filtering, in score order
    pub candidates: Vec<String>,
    /// Registry size when the decision was made
    pub total_backends: usize,
    /// Healthy backends when the decision was made
    pub healthy_backends: usize,
}

/// A completed execution with its provenance
#[derive(Clone, Debug)]
pub struct ExecuteResult {
    /// The winning response
    pub response: GenerateResponse,
    /// Backend that produced it
    pub backend_id: String,
    /// Confidence score, when forwarding scored it
    pub confidence: Option<ConfidenceScore>,
    /// Backends tried, in order
    pub attempts: Vec<String>,
}

/// The capability a media type requires of a candidate
fn required_capability(media_type: MediaType) -> Capability {
    match media_type {
        MediaType::Text | MediaType::Code | MediaType::Auto => Capability::Generate,
        MediaType::Realtime => Capability::Stream,
        MediaType::Audio => Capability::AudioIn,
        MediaType::Image => Capability::ImageIn,
        MediaType::Video => Capability::VideoIn,
    }
}

// ============================================================================
// Router
// ============================================================================

/// The request router
pub struct Router {
    registry: Arc<BackendRegistry>,
    default_backend: String,
    forwarding: ForwardingPolicy,
    breakers: BreakerSet,
    estimator: ConfidenceEstimator,
    detector: WorkloadDetector,
    classifier: Classifier,
    thermal: Arc<ThermalGate>,
    policy: Option<Arc<PolicyEngine>>,
}

impl Router {
    /// Create a router over a registry
    #[must_use]
    pub fn new(
        registry: Arc<BackendRegistry>,
        default_backend: impl Into<String>,
        forwarding: ForwardingPolicy,
    ) -> Self {
        Self {
            registry,
            default_backend: default_backend.into(),
            forwarding,
            breakers: BreakerSet::new(BreakerConfig::default()),
            estimator: ConfidenceEstimator::default(),
            detector: WorkloadDetector::new(),
            classifier: Classifier::new(),
            thermal: Arc::new(ThermalGate::default()),
            policy: None,
        }
    }

    /// Use a specific breaker configuration
    #[must_use]
    pub fn with_breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breakers = BreakerSet::new(config);
        self
    }

    /// Use a specific confidence estimator
    #[must_use]
    pub fn with_estimator(mut self, estimator: ConfidenceEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Attach a budget engine; requests are charged before dispatch
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<PolicyEngine>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Attach a thermal gate
    #[must_use]
    pub fn with_thermal_gate(mut self, thermal: Arc<ThermalGate>) -> Self {
        self.thermal = thermal;
        self
    }

    /// The registry this router dispatches over
    #[must_use]
    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Breaker set, exposed for admin reset paths
    #[must_use]
    pub fn breakers(&self) -> &BreakerSet {
        &self.breakers
    }

    /// Thermal gate handle for the sensor loop
    #[must_use]
    pub fn thermal_gate(&self) -> Arc<ThermalGate> {
        self.thermal.clone()
    }

    /// Workload detector, shared with the transport layer
    #[must_use]
    pub fn detector(&self) -> &WorkloadDetector {
        &self.detector
    }

    // ------------------------------------------------------------------
    // Candidate selection
    // ------------------------------------------------------------------

    /// Select a backend for the annotated request
    ///
    /// Filters by health, breaker state, capability, model support and the
    /// power/latency ceilings, then scores what survives. An empty candidate
    /// set is an error carrying the registry counts and active constraints.
    pub fn route_request(&self, annotations: &Annotations) -> Result<RouteDecision, GatewayError> {
        let all = self.registry.snapshot();
        let total = all.len();
        let healthy = all.iter().filter(|b| b.is_healthy()).count();

        let needed = required_capability(annotations.media_type);

        let mut candidates: Vec<Arc<dyn Backend>> = all
            .into_iter()
            .filter(|b| b.is_healthy())
            .filter(|b| !self.breakers.is_open(b.id()))
            .filter(|b| b.has_capability(needed))
            .filter(|b| {
                annotations
                    .model
                    .as_deref()
                    .map_or(true, |m| b.supports_model(m))
            })
            .filter(|b| {
                annotations
                    .max_power_watts
                    .map_or(true, |max| b.power_watts() <= max)
            })
            .filter(|b| {
                annotations
                    .max_latency_ms
                    .map_or(true, |max| b.avg_latency_ms() <= max)
            })
            .collect();

        if candidates.is_empty() {
            return Err(BackendError::NoBackendsAvailable {
                total,
                healthy,
                constraints: self.describe_constraints(annotations),
            }
            .into());
        }

        self.score_candidates(&mut candidates, annotations);

        let ids: Vec<String> = candidates.iter().map(|b| b.id().to_string()).collect();
        let decision = RouteDecision {
            backend_id: ids[0].clone(),
            candidates: ids,
            total_backends: total,
            healthy_backends: healthy,
        };

        tracing::debug!(
            request = %annotations.request_id,
            backend = %decision.backend_id,
            candidates = decision.candidates.len(),
            "Routing decision"
        );
        Ok(decision)
    }

    /// Order candidates best-first
    ///
    /// Priority descending, then the annotation-selected secondary criterion
    /// (recent average latency when latency-critical, declared power when
    /// power-preferring), with the configured default backend and then the
    /// id as tiebreakers.
    fn score_candidates(&self, candidates: &mut [Arc<dyn Backend>], annotations: &Annotations) {
        let latency_key = |b: &Arc<dyn Backend>| -> u64 {
            let snap = b.metrics_snapshot();
            if snap.request_count > 0 {
                snap.avg_latency_ms as u64
            } else {
                b.avg_latency_ms()
            }
        };

        let default_backend = self.default_backend.clone();
        let latency_critical = annotations.latency_critical;
        let prefer_power = annotations.prefer_power_efficiency;

        candidates.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| {
                    if latency_critical {
                        latency_key(a).cmp(&latency_key(b))
                    } else if prefer_power {
                        a.power_watts()
                            .partial_cmp(&b.power_watts())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    } else {
                        std::cmp::Ordering::Equal
                    }
                })
                .then_with(|| {
                    // Prefer the configured default among otherwise-equal picks
                    let a_default = a.id() == default_backend;
                    let b_default = b.id() == default_backend;
                    b_default.cmp(&a_default)
                })
                .then_with(|| a.id().cmp(b.id()))
        });
    }

    fn describe_constraints(&self, annotations: &Annotations) -> String {
        let mut parts = vec![format!("media_type={}", annotations.media_type)];
        if let Some(ref m) = annotations.model {
            parts.push(format!("model={m}"));
        }
        if let Some(w) = annotations.max_power_watts {
            parts.push(format!("max_power_watts={w}"));
        }
        if let Some(l) = annotations.max_latency_ms {
            parts.push(format!("max_latency_ms={l}"));
        }
        parts.join(", ")
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Execute a request end to end: route, charge budget, invoke, and
    /// escalate on low confidence when forwarding is enabled
    pub async fn execute(
        &self,
        annotations: &Annotations,
        request: &GenerateRequest,
        cancel: &CancelToken,
    ) -> Result<ExecuteResult, GatewayError> {
        let decision = self.route_request(annotations)?;
        let primary = self
            .registry
            .get(&decision.backend_id)
            .ok_or_else(|| RoutingError::Failed {
                detail: format!("backend vanished after routing: {}", decision.backend_id),
            })?;

        let energy_wh = self.charge_budget(annotations, &primary, &request.prompt)?;

        if !self.forwarding.enabled {
            let mut result = self.invoke_backend(&primary, request, annotations, cancel).await?;
            result.stats.energy_wh = energy_wh;
            return Ok(ExecuteResult {
                response: result,
                backend_id: primary.id().to_string(),
                confidence: None,
                attempts: vec![primary.id().to_string()],
            });
        }

        self.execute_with_escalation(annotations, request, cancel, &primary, energy_wh)
            .await
    }

    async fn execute_with_escalation(
        &self,
        annotations: &Annotations,
        request: &GenerateRequest,
        cancel: &CancelToken,
        primary: &Arc<dyn Backend>,
        energy_wh: f64,
    ) -> Result<ExecuteResult, GatewayError> {
        let mut attempts: Vec<String> = Vec::new();
        let mut best: Option<(ConfidenceScore, GenerateResponse, String)> = None;
        let mut last_error: Option<GatewayError> = None;

        // Primary attempt, then up to max_retries steps along the chain
        match self
            .attempt(primary, request, annotations, cancel, &mut attempts)
            .await
        {
            Ok(Some(result)) => {
                let (score, mut response) = result;
                response.stats.energy_wh = energy_wh;
                if !score.should_escalate(self.forwarding.min_confidence) {
                    return Ok(ExecuteResult {
                        backend_id: primary.id().to_string(),
                        confidence: Some(score),
                        response,
                        attempts,
                    });
                }
                tracing::info!(
                    request = %annotations.request_id,
                    backend = %primary.id(),
                    score = score.overall,
                    threshold = self.forwarding.min_confidence,
                    "Low confidence, escalating"
                );
                best = Some((score, response, primary.id().to_string()));
            }
            Ok(None) => {} // skippable failure, chain continues
            Err(e) => last_error = Some(e),
        }

        let mut retries = 0u32;
        for next_id in &self.forwarding.escalation_path {
            if retries >= self.forwarding.max_retries {
                break;
            }
            if attempts.iter().any(|tried| tried == next_id) {
                continue;
            }
            let Some(backend) = self.registry.get(next_id) else {
                tracing::warn!(backend = %next_id, "Escalation target not registered, skipping");
                continue;
            };
            if !backend.is_healthy() || self.breakers.is_open(next_id) {
                continue;
            }
            if self.forwarding.respect_thermal_limits && self.thermal.blocks(backend.power_watts()) {
                tracing::debug!(backend = %next_id, "Thermally blocked, skipping");
                continue;
            }

            // Small jittered pause between escalation steps
            let pause = rand::thread_rng().gen_range(25..75);
            tokio::time::sleep(Duration::from_millis(pause)).await;

            retries += 1;
            match self
                .attempt(&backend, request, annotations, cancel, &mut attempts)
                .await
            {
                Ok(Some((score, mut response))) => {
                    response.stats.energy_wh = energy_wh;
                    if !score.should_escalate(self.forwarding.min_confidence) {
                        return Ok(ExecuteResult {
                            backend_id: backend.id().to_string(),
                            confidence: Some(score),
                            response,
                            attempts,
                        });
                    }
                    let better = best
                        .as_ref()
                        .map_or(true, |(b, _, _)| score.overall > b.overall);
                    if better {
                        best = Some((score, response, backend.id().to_string()));
                    }
                }
                Ok(None) => {}
                Err(e) => last_error = Some(e),
            }
        }

        // Exhausted: hand back the best attempt when the policy allows and
        // one exists; otherwise the most recent error
        if self.forwarding.return_best_attempt {
            if let Some((score, response, backend_id)) = best {
                tracing::info!(
                    request = %annotations.request_id,
                    backend = %backend_id,
                    score = score.overall,
                    "Returning best low-confidence attempt"
                );
                return Ok(ExecuteResult {
                    backend_id,
                    confidence: Some(score),
                    response,
                    attempts,
                });
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RoutingError::Failed {
                detail: format!(
                    "all {} attempts scored below {}",
                    attempts.len(),
                    self.forwarding.min_confidence
                ),
            }
            .into()
        }))
    }

    /// One attempt against one backend
    ///
    /// `Ok(None)` means a skippable failure (breaker open, unhealthy,
    /// unsupported, transport) that the chain should step past.
    async fn attempt(
        &self,
        backend: &Arc<dyn Backend>,
        request: &GenerateRequest,
        annotations: &Annotations,
        cancel: &CancelToken,
        attempts: &mut Vec<String>,
    ) -> Result<Option<(ConfidenceScore, GenerateResponse)>, GatewayError> {
        attempts.push(backend.id().to_string());

        match self.invoke_backend(backend, request, annotations, cancel).await {
            Ok(response) => {
                let score = self.estimator.estimate(
                    &request.prompt,
                    &response.text,
                    &request.model,
                    backend.id(),
                );
                Ok(Some((score, response)))
            }
            Err(GatewayError::Backend(e)) if e.is_skippable() => {
                tracing::debug!(backend = %backend.id(), error = %e, "Skippable failure, trying next");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Invoke a backend through its circuit breaker
    ///
    /// The breaker pass is acquired before the call and the outcome reported
    /// after; the call itself runs outside the breaker's critical section.
    /// Cancellation is recorded in metrics but is not a breaker failure.
    pub async fn invoke_backend(
        &self,
        backend: &Arc<dyn Backend>,
        request: &GenerateRequest,
        annotations: &Annotations,
        cancel: &CancelToken,
    ) -> Result<GenerateResponse, GatewayError> {
        let breaker = self.breakers.get(backend.id());
        breaker.try_acquire()?;

        let start = Instant::now();
        let deadline = annotations.deadline_ms.map(Duration::from_millis);

        let outcome = match deadline {
            Some(limit) => match tokio::time::timeout(limit, backend.generate(request, cancel)).await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout {
                    backend_id: backend.id().to_string(),
                    elapsed_ms: limit.as_millis() as u64,
                }),
            },
            None => backend.generate(request, cancel).await,
        };

        let elapsed = start.elapsed();
        match outcome {
            Ok(response) => {
                breaker.record_success();
                backend.update_metrics(elapsed, RequestOutcome::Success);
                Ok(response)
            }
            Err(e) if e.is_cancelled() => {
                backend.update_metrics(elapsed, RequestOutcome::Cancelled);
                Err(e.into())
            }
            Err(e) => {
                breaker.record_failure();
                backend.update_metrics(elapsed, RequestOutcome::Error);
                Err(e.into())
            }
        }
    }

    /// Open a stream from the routed backend, breaker-protected
    ///
    /// Stream-level metrics are the transport's concern; the breaker records
    /// only whether the stream could be opened.
    pub async fn execute_stream(
        &self,
        annotations: &Annotations,
        request: &GenerateRequest,
        cancel: &CancelToken,
    ) -> Result<(String, StreamHandle), GatewayError> {
        let decision = self.route_request(annotations)?;
        let backend = self
            .registry
            .get(&decision.backend_id)
            .ok_or_else(|| RoutingError::Failed {
                detail: format!("backend vanished after routing: {}", decision.backend_id),
            })?;

        self.charge_budget(annotations, &backend, &request.prompt)?;

        let breaker = self.breakers.get(backend.id());
        breaker.try_acquire()?;

        match backend.generate_stream(request, cancel).await {
            Ok(handle) => {
                breaker.record_success();
                Ok((backend.id().to_string(), handle))
            }
            Err(e) if e.is_cancelled() => {
                backend.update_metrics(Duration::ZERO, RequestOutcome::Cancelled);
                Err(e.into())
            }
            Err(e) => {
                breaker.record_failure();
                backend.update_metrics(Duration::ZERO, RequestOutcome::Error);
                Err(e.into())
            }
        }
    }

    /// Route and execute an embedding request
    ///
    /// Candidates are filtered for the embed capability instead of the
    /// media-type mapping; everything else (health, breaker, metrics) works
    /// as for generation. Embeddings never escalate.
    pub async fn execute_embed(
        &self,
        request: &crate::backend::EmbedRequest,
        cancel: &CancelToken,
    ) -> Result<crate::backend::EmbedResponse, GatewayError> {
        let mut candidates: Vec<Arc<dyn Backend>> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|b| b.is_healthy())
            .filter(|b| !self.breakers.is_open(b.id()))
            .filter(|b| b.has_capability(Capability::Embed))
            .filter(|b| b.supports_model(&request.model))
            .collect();

        if candidates.is_empty() {
            return Err(BackendError::NoBackendsAvailable {
                total: self.registry.len(),
                healthy: self.registry.healthy_count(),
                constraints: format!("capability=embed, model={}", request.model),
            }
            .into());
        }

        self.score_candidates(&mut candidates, &Annotations::default());
        let backend = candidates.remove(0);

        let breaker = self.breakers.get(backend.id());
        breaker.try_acquire()?;

        let start = Instant::now();
        match backend.embed(request, cancel).await {
            Ok(response) => {
                breaker.record_success();
                backend.update_metrics(start.elapsed(), RequestOutcome::Success);
                Ok(response)
            }
            Err(e) if e.is_cancelled() => {
                backend.update_metrics(start.elapsed(), RequestOutcome::Cancelled);
                Err(e.into())
            }
            Err(e) => {
                breaker.record_failure();
                backend.update_metrics(start.elapsed(), RequestOutcome::Error);
                Err(e.into())
            }
        }
    }

    /// Charge the user's budget for this dispatch, returning the estimated
    /// energy so it can be attached to response stats
    fn charge_budget(
        &self,
        annotations: &Annotations,
        backend: &Arc<dyn Backend>,
        prompt: &str,
    ) -> Result<f64, GatewayError> {
        let Some(ref policy) = self.policy else {
            return Ok(0.0);
        };

        let user = annotations
            .overrides
            .get("user")
            .map_or("anonymous", String::as_str);
        let tier = annotations
            .overrides
            .get("tier")
            .and_then(|t| serde_json::from_str::<UserTier>(&format!("\"{t}\"")).ok())
            .unwrap_or_default();

        let est_tokens = self.classifier.estimate_token_count(prompt);
        let est_wh = estimate_energy_wh(backend.hardware_class(), est_tokens);

        policy
            .check_and_deduct(user, tier, backend.hardware_class(), est_wh)
            .map_err(GatewayError::from)?;
        Ok(est_wh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::test_utils::MockBackend;

    fn registry_with(backends: Vec<MockBackend>) -> Arc<BackendRegistry> {
        let registry = Arc::new(BackendRegistry::new());
        for b in backends {
            registry.register(Arc::new(b)).unwrap();
        }
        registry
    }

    fn plain_router(registry: Arc<BackendRegistry>) -> Router {
        Router::new(registry, "igpu-0", ForwardingPolicy::default())
    }

    #[test]
    fn test_route_filters_unhealthy() {
        let sick = MockBackend::healthy("a");
        sick.core().set_healthy(false);
        let registry = registry_with(vec![sick, MockBackend::healthy("b")]);
        let router = plain_router(registry);

        let decision = router.route_request(&Annotations::default()).unwrap();
        assert_eq!(decision.backend_id, "b");
        assert_eq!(decision.total_backends, 2);
        assert_eq!(decision.healthy_backends, 1);
    }

    #[test]
    fn test_route_empty_is_error_with_counts() {
        let sick = MockBackend::healthy("a");
        sick.core().set_healthy(false);
        let registry = registry_with(vec![sick]);
        let router = plain_router(registry);

        let err = router.route_request(&Annotations::default()).unwrap_err();
        match err {
            GatewayError::Backend(BackendError::NoBackendsAvailable {
                total,
                healthy,
                constraints,
            }) => {
                assert_eq!(total, 1);
                assert_eq!(healthy, 0);
                assert!(constraints.contains("media_type"));
            }
            other => panic!("expected NoBackendsAvailable, got {other:?}"),
        }
    }

    #[test]
    fn test_route_respects_model_filter() {
        let picky = MockBackend::healthy("picky").with_supported_models(["llama*"]);
        let registry = registry_with(vec![picky, MockBackend::healthy("open")]);
        let router = plain_router(registry);

        let ann = Annotations::default().with_model("qwen2.5:7b");
        let decision = router.route_request(&ann).unwrap();
        assert_eq!(decision.backend_id, "open");
        assert_eq!(decision.candidates, vec!["open".to_string()]);
    }

    #[test]
    fn test_route_respects_power_and_latency_ceilings() {
        let hungry = MockBackend::healthy("hungry").with_characteristics(55.0, 100, 90);
        let frugal = MockBackend::healthy("frugal").with_characteristics(3.0, 400, 50);
        let registry = registry_with(vec![hungry, frugal]);
        let router = plain_router(registry);

        let ann = Annotations::default().with_max_power_watts(10.0);
        assert_eq!(router.route_request(&ann).unwrap().backend_id, "frugal");

        let ann = Annotations::default().with_max_latency_ms(200);
        assert_eq!(router.route_request(&ann).unwrap().backend_id, "hungry");
    }

    #[test]
    fn test_scoring_priority_then_id() {
        let low = MockBackend::healthy("aaa").with_characteristics(10.0, 100, 40);
        let high = MockBackend::healthy("zzz").with_characteristics(10.0, 100, 90);
        let registry = registry_with(vec![low, high]);
        let router = plain_router(registry);

        let decision = router.route_request(&Annotations::default()).unwrap();
        assert_eq!(decision.backend_id, "zzz");
    }

    #[test]
    fn test_scoring_power_preference_breaks_priority_tie() {
        let heavy = MockBackend::healthy("heavy").with_characteristics(55.0, 100, 50);
        let light = MockBackend::healthy("light").with_characteristics(3.0, 100, 50);
        let registry = registry_with(vec![heavy, light]);
        let router = plain_router(registry);

        let ann = Annotations::default().power_efficient();
        assert_eq!(router.route_request(&ann).unwrap().backend_id, "light");

        // Without the preference the id tiebreak wins
        assert_eq!(
            router
                .route_request(&Annotations::default())
                .unwrap()
                .backend_id,
            "heavy"
        );
    }

    #[test]
    fn test_scoring_latency_critical_uses_declared_until_observed() {
        let slow = MockBackend::healthy("slow").with_characteristics(10.0, 900, 50);
        let fast = MockBackend::healthy("fast").with_characteristics(10.0, 80, 50);
        let registry = registry_with(vec![slow, fast]);
        let router = plain_router(registry);

        let ann = Annotations::default().latency_critical();
        assert_eq!(router.route_request(&ann).unwrap().backend_id, "fast");
    }

    #[test]
    fn test_breaker_open_excluded_from_candidates() {
        let registry = registry_with(vec![MockBackend::healthy("a"), MockBackend::healthy("b")]);
        let router = plain_router(registry).with_breaker_config(BreakerConfig {
            max_failures: 1,
            timeout: Duration::from_secs(60),
            half_open_success_target: 1,
        });

        router.breakers().get("a").record_failure();

        let decision = router.route_request(&Annotations::default()).unwrap();
        assert_eq!(decision.backend_id, "b");
    }

    #[tokio::test]
    async fn test_execute_forwarding_disabled() {
        let backend = MockBackend::healthy("a").with_response("a perfectly adequate answer");
        let registry = registry_with(vec![backend]);
        let router = plain_router(registry);

        let result = router
            .execute(
                &Annotations::default(),
                &GenerateRequest::new("hi", "llama3:7b"),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.backend_id, "a");
        assert!(result.confidence.is_none());
        assert_eq!(result.attempts, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_escalation_accepts_first_confident() {
        // Scores track response quality: a and b hedge, c answers well.
        // Priorities make "a" the routed primary.
        let registry = Arc::new(BackendRegistry::new());
        for (id, prio, resp) in [
            ("a", 90u8, "I don't know... maybe"),
            ("b", 50, "unclear, possibly..."),
            (
                "c",
                40,
                "The capital of France is Paris, seat of government since 508 CE \
                 and the country's political and cultural center.",
            ),
        ] {
            registry
                .register(Arc::new(
                    MockBackend::healthy(id)
                        .with_characteristics(10.0, 100, prio)
                        .with_response(resp),
                ))
                .unwrap();
        }

        let forwarding = ForwardingPolicy {
            enabled: true,
            min_confidence: 0.7,
            max_retries: 2,
            escalation_path: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            respect_thermal_limits: true,
            return_best_attempt: true,
        };
        let router = Router::new(registry, "a", forwarding);
        let result = router
            .execute(
                &Annotations::default(),
                &GenerateRequest::new("capital of France?", "llama3:7b"),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.backend_id, "c");
        assert_eq!(
            result.attempts,
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(result.confidence.unwrap().overall >= 0.7);
    }

    #[tokio::test]
    async fn test_escalation_exhausted_returns_best_attempt() {
        let registry = Arc::new(BackendRegistry::new());
        for (id, prio, resp) in [
            ("a", 90u8, "I don't know"),
            // Longer and cleaner than the others: the best of a bad lot
            ("b", 50, "It could be Paris, though I am uncertain about that answer overall."),
            ("c", 40, "error: no idea..."),
        ] {
            registry
                .register(Arc::new(
                    MockBackend::healthy(id)
                        .with_characteristics(10.0, 100, prio)
                        .with_response(resp),
                ))
                .unwrap();
        }

        let forwarding = ForwardingPolicy {
            enabled: true,
            min_confidence: 0.99,
            max_retries: 2,
            escalation_path: vec!["b".to_string(), "c".to_string()],
            respect_thermal_limits: true,
            return_best_attempt: true,
        };
        let router = Router::new(registry, "a", forwarding);

        let result = router
            .execute(
                &Annotations::default(),
                &GenerateRequest::new("capital?", "llama3:7b"),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.backend_id, "b");
        assert_eq!(result.attempts.len(), 3);
    }

    #[tokio::test]
    async fn test_escalation_exhausted_without_best_attempt_errors() {
        let registry = Arc::new(BackendRegistry::new());
        for (id, prio) in [("a", 90u8), ("b", 50)] {
            registry
                .register(Arc::new(
                    MockBackend::healthy(id)
                        .with_characteristics(10.0, 100, prio)
                        .with_response("meh"),
                ))
                .unwrap();
        }

        let forwarding = ForwardingPolicy {
            enabled: true,
            min_confidence: 0.99,
            max_retries: 1,
            escalation_path: vec!["b".to_string()],
            respect_thermal_limits: true,
            return_best_attempt: false,
        };
        let router = Router::new(registry, "a", forwarding);

        let err = router
            .execute(
                &Annotations::default(),
                &GenerateRequest::new("q", "llama3:7b"),
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Routing(_)));
    }

    #[tokio::test]
    async fn test_escalation_skips_failing_backend() {
        let registry = Arc::new(BackendRegistry::new());
        registry
            .register(Arc::new(
                MockBackend::failing("a").with_characteristics(10.0, 100, 90),
            ))
            .unwrap();
        registry
            .register(Arc::new(
                MockBackend::healthy("b")
                    .with_characteristics(10.0, 100, 50)
                    .with_response(
                        "A thorough, confident answer that easily clears the length bar \
                         and hedges on nothing at all.",
                    ),
            ))
            .unwrap();

        let forwarding = ForwardingPolicy {
            enabled: true,
            min_confidence: 0.5,
            max_retries: 2,
            escalation_path: vec!["b".to_string()],
            respect_thermal_limits: true,
            return_best_attempt: true,
        };
        let router = Router::new(registry, "a", forwarding);

        let result = router
            .execute(
                &Annotations::default(),
                &GenerateRequest::new("q", "llama3:7b"),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        // Transport failure on "a" is skip-worthy, not terminal
        assert_eq!(result.backend_id, "b");
    }

    #[tokio::test]
    async fn test_thermal_gate_blocks_escalation_target() {
        let registry = Arc::new(BackendRegistry::new());
        registry
            .register(Arc::new(
                MockBackend::healthy("a")
                    .with_characteristics(10.0, 100, 90)
                    .with_response("I don't know"),
            ))
            .unwrap();
        registry
            .register(Arc::new(
                MockBackend::healthy("hot-gpu")
                    .with_characteristics(55.0, 100, 80)
                    .with_response("An excellent and confident answer, long enough to score well."),
            ))
            .unwrap();

        let forwarding = ForwardingPolicy {
            enabled: true,
            min_confidence: 0.9,
            max_retries: 2,
            escalation_path: vec!["hot-gpu".to_string()],
            respect_thermal_limits: true,
            return_best_attempt: true,
        };
        let gate = Arc::new(ThermalGate::new(true));
        gate.set_over_limit(true);
        let router = Router::new(registry, "a", forwarding).with_thermal_gate(gate);

        let result = router
            .execute(
                &Annotations::default(),
                &GenerateRequest::new("q", "llama3:7b"),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        // The hot GPU was never tried; the weak primary answer came back
        assert_eq!(result.backend_id, "a");
        assert_eq!(result.attempts, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_invoke_records_metrics_and_breaker() {
        let registry = registry_with(vec![MockBackend::failing("a")]);
        let router = plain_router(registry.clone()).with_breaker_config(BreakerConfig {
            max_failures: 2,
            timeout: Duration::from_secs(60),
            half_open_success_target: 1,
        });

        let backend = registry.get("a").unwrap();
        let ann = Annotations::default();
        let req = GenerateRequest::new("q", "m");
        let cancel = CancelToken::new();

        for _ in 0..2 {
            let _ = router.invoke_backend(&backend, &req, &ann, &cancel).await;
        }

        assert_eq!(backend.metrics_snapshot().error_count, 2);
        assert!(router.breakers().is_open("a"));

        // Third call is rejected by the breaker without touching the backend
        let err = router
            .invoke_backend(&backend, &req, &ann, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Backend(BackendError::BreakerOpen { .. })
        ));
        assert_eq!(backend.metrics_snapshot().request_count, 2);
    }

    #[tokio::test]
    async fn test_execute_embed_routes_by_capability() {
        use crate::backend::{Capability, EmbedRequest};

        let registry = Arc::new(BackendRegistry::new());
        registry
            .register(Arc::new(
                MockBackend::healthy("gen-only")
                    .with_characteristics(10.0, 100, 90)
                    .with_capabilities(&[Capability::Generate]),
            ))
            .unwrap();
        registry
            .register(Arc::new(
                MockBackend::healthy("embedder").with_characteristics(10.0, 100, 40),
            ))
            .unwrap();
        let router = plain_router(registry.clone());

        let response = router
            .execute_embed(
                &EmbedRequest {
                    input: "text".to_string(),
                    model: "m".to_string(),
                },
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.embedding.len(), 3);

        // The generate-only backend was never considered despite higher
        // priority
        assert_eq!(registry.get("gen-only").unwrap().metrics_snapshot().request_count, 0);
        assert_eq!(registry.get("embedder").unwrap().metrics_snapshot().request_count, 1);
    }

    #[tokio::test]
    async fn test_budget_charged_on_execute() {
        use crate::routing::policy::{FixedPowerSource, PowerState};

        let registry = registry_with(vec![
            MockBackend::healthy("a").with_response("a long enough and confident response here")
        ]);
        let policy = Arc::new(PolicyEngine::with_power_source(Arc::new(FixedPowerSource(
            PowerState::Ac,
        ))));
        let router = plain_router(registry).with_policy(policy.clone());

        let mut ann = Annotations::default();
        ann.overrides.insert("user".to_string(), "alice".to_string());

        router
            .execute(
                &ann,
                &GenerateRequest::new("write a paragraph about the borrow checker", "llama3:7b"),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        // "paragraph" estimates 100 tokens, charged against the iGPU profile
        let snap = policy.budget_snapshot("alice").unwrap();
        assert!(snap.used_today_wh > 0.0);
    }
}
