//! Backend Abstraction
//!
//! The uniform dispatch contract (traits), shared data shapes (types),
//! model filtering, per-backend metrics, the concurrent registry, and the
//! Ollama-style reference wire implementation.

pub mod filter;
pub mod metrics;
pub mod ollama;
pub mod registry;
pub mod traits;
pub mod types;

pub use filter::ModelFilter;
pub use metrics::{BackendMetrics, MetricsSnapshot, RequestOutcome};
pub use ollama::OllamaBackend;
pub use registry::BackendRegistry;
pub use traits::{Backend, BackendCore, StreamHandle};
pub use types::{
    Capability, CapabilitySet, EmbedRequest, EmbedResponse, GenerateOptions, GenerateRequest,
    GenerateResponse, GenerationStats, HardwareClass, ImageRequest, ImageResponse, StreamChunk,
    TranscribeRequest,
};
