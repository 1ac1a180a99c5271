//! Backend Contract
//!
//! Trait definition every dispatch target satisfies: local accelerators
//! (NPU, iGPU, discrete GPU, CPU) and hosted cloud APIs alike. The router
//! only ever sees this contract; provider wire formats stay inside the
//! implementations.
//!
//! # Design
//!
//! Shared identity, capability, health and metric state lives in an embedded
//! [`BackendCore`] record so every variant behaves identically for the parts
//! the router consumes. Implementations add their wire specifics around it.
//!
//! Failure modes are surfaced distinctly via [`BackendError`]: transport
//! failure, protocol error, unsupported model/op, caller cancellation,
//! deadline exceeded. Metric updates record success, error and cancelled
//! outcomes separately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::filter::ModelFilter;
use super::metrics::{BackendMetrics, MetricsSnapshot, RequestOutcome};
use super::types::{
    Capability, CapabilitySet, EmbedRequest, EmbedResponse, GenerateRequest, GenerateResponse,
    HardwareClass, ImageRequest, ImageResponse, StreamChunk, TranscribeRequest,
};
use crate::cancel::CancelToken;
use crate::error::BackendError;

/// Receiver half of a streaming generation
///
/// Chunks arrive in backend emission order; the terminal chunk has
/// `done = true`. Dropping the receiver cancels the producing task: its next
/// send fails and it tears down the underlying connection or process.
pub type StreamHandle = mpsc::Receiver<Result<StreamChunk, BackendError>>;

// ============================================================================
// Shared Backend Record
// ============================================================================

/// Identity, capability and runtime state common to every backend variant
#[derive(Debug)]
pub struct BackendCore {
    /// Unique backend id (registry key)
    pub id: String,
    /// Variant discriminator, e.g. "ollama", "openvino", "cloud"
    pub backend_type: String,
    /// Human-readable name
    pub name: String,
    /// Hardware bucket for power/quota policy
    pub hardware_class: HardwareClass,
    /// Declared capability set
    pub capabilities: CapabilitySet,
    /// Model support filter
    pub model_filter: ModelFilter,
    /// Declared draw under load, in watts
    pub power_watts: f64,
    /// Declared typical latency in milliseconds
    pub avg_latency_ms: u64,
    /// Scheduling priority (higher wins)
    pub priority: u8,
    /// Largest model this backend will load, in GB
    pub max_model_size_gb: f64,

    healthy: AtomicBool,
    last_check: Mutex<Option<Instant>>,
    metrics: BackendMetrics,
}

impl BackendCore {
    /// Create a core record; backends start healthy until a probe says otherwise
    pub fn new(
        id: impl Into<String>,
        backend_type: impl Into<String>,
        name: impl Into<String>,
        hardware_class: HardwareClass,
    ) -> Self {
        Self {
            id: id.into(),
            backend_type: backend_type.into(),
            name: name.into(),
            hardware_class,
            capabilities: CapabilitySet::text(),
            model_filter: ModelFilter::accept_all(),
            power_watts: 0.0,
            avg_latency_ms: 0,
            priority: 50,
            max_model_size_gb: 0.0,
            healthy: AtomicBool::new(true),
            last_check: Mutex::new(None),
            metrics: BackendMetrics::new(),
        }
    }

    /// Set capabilities
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the model filter
    #[must_use]
    pub fn with_model_filter(mut self, filter: ModelFilter) -> Self {
        self.model_filter = filter;
        self
    }

    /// Set cost/perf characteristics
    #[must_use]
    pub fn with_characteristics(
        mut self,
        power_watts: f64,
        avg_latency_ms: u64,
        priority: u8,
        max_model_size_gb: f64,
    ) -> Self {
        self.power_watts = power_watts;
        self.avg_latency_ms = avg_latency_ms;
        self.priority = priority;
        self.max_model_size_gb = max_model_size_gb;
        self
    }

    /// Current health flag
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Flip the health flag and stamp the check time
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
        *self.last_check.lock() = Some(Instant::now());
    }

    /// Time since the last health probe, if any has run
    #[must_use]
    pub fn time_since_check(&self) -> Option<Duration> {
        self.last_check.lock().map(|t| t.elapsed())
    }

    /// Metric state
    #[must_use]
    pub fn metrics(&self) -> &BackendMetrics {
        &self.metrics
    }
}

// ============================================================================
// Backend Trait
// ============================================================================

/// The uniform contract every dispatch target satisfies
#[async_trait]
pub trait Backend: Send + Sync {
    /// Shared identity/capability/health/metric record
    fn core(&self) -> &BackendCore;

    /// Unique backend id
    fn id(&self) -> &str {
        &self.core().id
    }

    /// Variant discriminator
    fn backend_type(&self) -> &str {
        &self.core().backend_type
    }

    /// Human-readable name
    fn name(&self) -> &str {
        &self.core().name
    }

    /// Hardware bucket
    fn hardware_class(&self) -> HardwareClass {
        self.core().hardware_class
    }

    /// Whether the backend declares `cap`
    fn has_capability(&self, cap: Capability) -> bool {
        self.core().capabilities.has(cap)
    }

    /// Whether the backend serves `model` (exclusions win; empty list = any)
    fn supports_model(&self, model: &str) -> bool {
        self.core().model_filter.supports_model(model)
    }

    /// Declared power draw in watts
    fn power_watts(&self) -> f64 {
        self.core().power_watts
    }

    /// Declared typical latency in milliseconds
    fn avg_latency_ms(&self) -> u64 {
        self.core().avg_latency_ms
    }

    /// Scheduling priority (higher wins)
    fn priority(&self) -> u8 {
        self.core().priority
    }

    /// Current health flag (atomic; no probe)
    fn is_healthy(&self) -> bool {
        self.core().is_healthy()
    }

    /// Record a request outcome into the shared metrics
    fn update_metrics(&self, latency: Duration, outcome: RequestOutcome) {
        self.core().metrics().record(latency, outcome);
    }

    /// Consistent snapshot of the shared metrics
    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.core().metrics().snapshot()
    }

    /// Probe the underlying service; flips the health flag and returns
    /// probe latency on success
    async fn health_check(&self) -> Result<Duration, BackendError>;

    /// Unary generation, racing the cancellation token
    async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: &CancelToken,
    ) -> Result<GenerateResponse, BackendError>;

    /// Streaming generation; chunks arrive on the returned handle
    async fn generate_stream(
        &self,
        request: &GenerateRequest,
        cancel: &CancelToken,
    ) -> Result<StreamHandle, BackendError>;

    /// Embedding, racing the cancellation token
    async fn embed(
        &self,
        request: &EmbedRequest,
        cancel: &CancelToken,
    ) -> Result<EmbedResponse, BackendError>;

    /// Audio transcription; backends without the `audio-in` capability keep
    /// the default, which rejects with a typed unsupported error
    async fn transcribe(
        &self,
        request: &TranscribeRequest,
        cancel: &CancelToken,
    ) -> Result<GenerateResponse, BackendError> {
        let _ = (request, cancel);
        Err(BackendError::Unsupported {
            backend_id: self.core().id.clone(),
            what: "audio-in".to_string(),
        })
    }

    /// Image generation; backends without the `image-out` capability keep
    /// the default, which rejects with a typed unsupported error
    async fn generate_image(
        &self,
        request: &ImageRequest,
        cancel: &CancelToken,
    ) -> Result<ImageResponse, BackendError> {
        let _ = (request, cancel);
        Err(BackendError::Unsupported {
            backend_id: self.core().id.clone(),
            what: "image-out".to_string(),
        })
    }

    /// Bring the backend up (spawn processes, warm connections)
    async fn start(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Tear the backend down, releasing resources
    async fn stop(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("id", &self.id())
            .field("backend_type", &self.backend_type())
            .finish()
    }
}
