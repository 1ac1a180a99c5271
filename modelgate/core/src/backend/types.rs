//! Backend Request/Response Types
//!
//! The data shapes shared by every backend variant: hardware classes,
//! capability flags, generation requests and responses, and streaming chunks.

use serde::{Deserialize, Serialize};

// ============================================================================
// Hardware Class
// ============================================================================

/// Coarse hardware bucket used for power and quota policy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HardwareClass {
    /// Neural processing unit (lowest power)
    Npu,
    /// Integrated GPU
    Igpu,
    /// Discrete GPU (NVIDIA-class for quota purposes)
    DiscreteGpu,
    /// CPU fallback
    Cpu,
    /// Hosted cloud API
    Cloud,
}

impl HardwareClass {
    /// Canonical string form, matching config and wire usage
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Npu => "npu",
            Self::Igpu => "igpu",
            Self::DiscreteGpu => "discrete-gpu",
            Self::Cpu => "cpu",
            Self::Cloud => "cloud",
        }
    }

    /// Parse from the canonical string form
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "npu" => Some(Self::Npu),
            "igpu" => Some(Self::Igpu),
            "discrete-gpu" | "dgpu" | "nvidia" => Some(Self::DiscreteGpu),
            "cpu" => Some(Self::Cpu),
            "cloud" => Some(Self::Cloud),
            _ => None,
        }
    }

    /// Whether this class counts against the hourly NVIDIA quota
    #[must_use]
    pub fn is_nvidia_class(&self) -> bool {
        matches!(self, Self::DiscreteGpu)
    }
}

impl std::fmt::Display for HardwareClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// A single backend capability
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Text generation (unary)
    Generate,
    /// Tokenwise streaming generation
    Stream,
    /// Embedding vectors
    Embed,
    /// Audio input (transcription)
    AudioIn,
    /// Audio output (synthesis)
    AudioOut,
    /// Image input (vision)
    ImageIn,
    /// Image output (generation)
    ImageOut,
    /// Video input
    VideoIn,
    /// Video output
    VideoOut,
}

/// Declared capability set of a backend
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    caps: Vec<Capability>,
}

impl CapabilitySet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from a list of capabilities (duplicates collapsed)
    #[must_use]
    pub fn from_caps(caps: &[Capability]) -> Self {
        let mut set = Self::new();
        for c in caps {
            set.add(*c);
        }
        set
    }

    /// Text-only generation backend: generate + stream + embed
    #[must_use]
    pub fn text() -> Self {
        Self::from_caps(&[Capability::Generate, Capability::Stream, Capability::Embed])
    }

    /// Add a capability
    pub fn add(&mut self, cap: Capability) {
        if !self.caps.contains(&cap) {
            self.caps.push(cap);
        }
    }

    /// Whether the capability is declared
    #[must_use]
    pub fn has(&self, cap: Capability) -> bool {
        self.caps.contains(&cap)
    }

    /// Iterate declared capabilities
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.caps.iter().copied()
    }
}

// ============================================================================
// Generation Request
// ============================================================================

/// Tunable generation parameters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Maximum tokens in the response (None = backend default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling cutoff
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Top-k sampling cutoff
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Context window override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u32>,
}

/// A generation request as the backend contract sees it
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// The prompt to complete
    pub prompt: String,
    /// Model identifier (backend-specific)
    pub model: String,
    /// Optional tuning parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<GenerateOptions>,
}

impl GenerateRequest {
    /// Create a new request with prompt and model
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            options: None,
        }
    }

    /// Attach options
    #[must_use]
    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Set max tokens, creating options if absent
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.options.get_or_insert_with(Default::default).max_tokens = Some(max_tokens);
        self
    }

    /// Set temperature, creating options if absent
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.options
            .get_or_insert_with(Default::default)
            .temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }
}

// ============================================================================
// Generation Response
// ============================================================================

/// Timing and throughput stats attached to a completed generation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    /// Wall-clock from dispatch to first non-empty token
    pub time_to_first_token_ms: u64,
    /// Wall-clock for the whole generation
    pub total_time_ms: u64,
    /// Tokens produced
    pub tokens_generated: u32,
    /// Tokens per second over the whole generation
    pub tokens_per_second: f64,
    /// Estimated energy consumed in watt-hours
    pub energy_wh: f64,
}

/// Response from a unary generation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// The generated text
    pub text: String,
    /// Model that produced it
    pub model: String,
    /// Timing and throughput stats
    pub stats: GenerationStats,
}

/// One increment of a streaming generation
///
/// The terminal chunk has `done = true` and may carry final stats.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Incremental token text (may be empty on the terminal chunk)
    pub token: String,
    /// Whether this is the terminal chunk
    pub done: bool,
    /// Final stats, present only on the terminal chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<GenerationStats>,
}

impl StreamChunk {
    /// A non-terminal token chunk
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            done: false,
            stats: None,
        }
    }

    /// The terminal chunk with stats
    #[must_use]
    pub fn terminal(stats: GenerationStats) -> Self {
        Self {
            token: String::new(),
            done: true,
            stats: Some(stats),
        }
    }
}

// ============================================================================
// Audio / Image
// ============================================================================

/// A transcription request for audio-capable backends
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscribeRequest {
    /// Raw audio bytes
    pub audio: Vec<u8>,
    /// Container/encoding, e.g. "wav", "ogg"
    pub format: String,
    /// Model identifier
    pub model: String,
}

/// An image generation request for image-capable backends
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    /// Text prompt describing the image
    pub prompt: String,
    /// Model identifier
    pub model: String,
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
}

/// A generated image
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageResponse {
    /// Encoded image bytes
    pub data: Vec<u8>,
    /// Encoding of `data`, e.g. "png"
    pub format: String,
    /// Model that produced it
    pub model: String,
}

// ============================================================================
// Embeddings
// ============================================================================

/// An embedding request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedRequest {
    /// Text to embed
    pub input: String,
    /// Model identifier
    pub model: String,
}

/// An embedding response
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedResponse {
    /// The embedding vector
    pub embedding: Vec<f32>,
    /// Model that produced it
    pub model: String,
}
