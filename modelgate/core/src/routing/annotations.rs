//! Request Annotations
//!
//! Per-request routing hints attached by clients or upstream middleware.
//! Annotations never change request semantics; they steer backend selection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Media Type
// ============================================================================

/// Workload media type, either declared by the client or detected
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Plain text generation
    Text,
    /// Code generation or analysis
    Code,
    /// Audio in or out
    Audio,
    /// Image in or out
    Image,
    /// Video in or out
    Video,
    /// Latency-critical interactive work
    Realtime,
    /// Let the workload detector decide
    #[default]
    Auto,
}

impl MediaType {
    /// Canonical string form
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Video => "video",
            Self::Realtime => "realtime",
            Self::Auto => "auto",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Priority
// ============================================================================

/// Request priority for queue ordering and shedding decisions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestPriority {
    /// Droppable background work
    BestEffort,
    /// Normal interactive traffic
    #[default]
    Normal,
    /// User-facing, latency-sensitive
    High,
    /// Must not be shed
    Critical,
}

impl RequestPriority {
    /// Resolve a wire keyword to a priority
    ///
    /// `best-effort`/`low` → best-effort, `high` → high,
    /// `critical`/`realtime` → critical, anything else → normal.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword.trim().to_ascii_lowercase().as_str() {
            "best-effort" | "low" => Self::BestEffort,
            "high" => Self::High,
            "critical" | "realtime" => Self::Critical,
            _ => Self::Normal,
        }
    }
}

// ============================================================================
// Annotations
// ============================================================================

/// Per-request routing hints
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotations {
    /// Request id for tracing; generated if absent
    #[serde(default)]
    pub request_id: String,

    /// Prefer the lowest-latency candidate over other orderings
    #[serde(default)]
    pub latency_critical: bool,

    /// Prefer the lowest-power candidate over other orderings
    #[serde(default)]
    pub prefer_power_efficiency: bool,

    /// Whether response caching may be applied upstream
    #[serde(default)]
    pub cache_enabled: bool,

    /// Hard ceiling on candidate declared latency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<u64>,

    /// Hard ceiling on candidate declared power draw
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_power_watts: Option<f64>,

    /// Declared or detected workload media type
    #[serde(default)]
    pub media_type: MediaType,

    /// Queue priority
    #[serde(default)]
    pub priority: RequestPriority,

    /// End-to-end deadline in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,

    /// Requested model, constrains candidate filtering when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Free-form key/value overrides
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub overrides: HashMap<String, String>,
}

impl Annotations {
    /// Create annotations with a fresh request id
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            ..Self::default()
        }
    }

    /// Set the media type
    #[must_use]
    pub fn with_media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = media_type;
        self
    }

    /// Mark latency-critical
    #[must_use]
    pub fn latency_critical(mut self) -> Self {
        self.latency_critical = true;
        self
    }

    /// Prefer power efficiency
    #[must_use]
    pub fn power_efficient(mut self) -> Self {
        self.prefer_power_efficiency = true;
        self
    }

    /// Set the priority
    #[must_use]
    pub fn with_priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Constrain to a specific model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Cap candidate declared latency
    #[must_use]
    pub fn with_max_latency_ms(mut self, max: u64) -> Self {
        self.max_latency_ms = Some(max);
        self
    }

    /// Cap candidate declared power
    #[must_use]
    pub fn with_max_power_watts(mut self, max: f64) -> Self {
        self.max_power_watts = Some(max);
        self
    }

    /// Set the deadline
    #[must_use]
    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }
}
