//! Prompt Complexity Classification
//!
//! Buckets prompts into simple/moderate/complex and recommends a hardware
//! class for each bucket given battery state and per-backend queue depth.
//! The heuristic path is pure string inspection; an optional LLM-backed
//! classifier delegates the same question to a small model and falls back to
//! Moderate on anything unexpected.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, GenerateRequest, HardwareClass};
use crate::cancel::CancelToken;

// ============================================================================
// Complexity
// ============================================================================

/// Prompt complexity bucket
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Short factual questions, quick replies
    Simple,
    /// The default bucket
    #[default]
    Moderate,
    /// Long-form analysis, generation, multi-part work
    Complex,
}

// ============================================================================
// Keyword Tables
// ============================================================================

const SIMPLE_OPENERS: &[&str] = &[
    "what is",
    "who is",
    "when was",
    "where is",
    "how old",
    "how many",
    "yes or no",
    "true or false",
];

const COMPLEX_MARKERS: &[&str] = &[
    "write a detailed",
    "explain in depth",
    "analyze",
    "compare and contrast",
    "create a comprehensive",
    "generate code",
    "write a story",
    "write an essay",
    "compose",
    "develop a plan",
];

const SIMPLE_MARKERS: &[&str] = &["briefly", "one sentence", "in short"];

const MODERATE_MARKERS: &[&str] = &["step by step", "first,"];

// ============================================================================
// Heuristic Classifier
// ============================================================================

/// String-inspection classifier
#[derive(Clone, Debug, Default)]
pub struct Classifier;

impl Classifier {
    /// Create a classifier
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Bucket a prompt, optionally biased by the requested model's size
    ///
    /// Rules apply in order; Complex markers beat Moderate markers when both
    /// are present.
    #[must_use]
    pub fn classify(&self, prompt: &str, model: &str) -> Complexity {
        if prompt.len() < 50 {
            return Complexity::Simple;
        }

        let lower = prompt.to_lowercase();

        if SIMPLE_OPENERS.iter().any(|p| lower.starts_with(p)) {
            return Complexity::Simple;
        }

        if COMPLEX_MARKERS.iter().any(|p| lower.contains(p)) {
            return Complexity::Complex;
        }

        if SIMPLE_MARKERS.iter().any(|p| lower.contains(p)) {
            return Complexity::Simple;
        }

        if MODERATE_MARKERS.iter().any(|p| lower.contains(p))
            || prompt.matches('?').count() > 1
        {
            return Complexity::Moderate;
        }

        let model_lower = model.to_lowercase();
        if model_lower.contains("0.5b") || model_lower.contains("1.5b") {
            return Complexity::Simple;
        }
        if model_lower.contains("70b") || model_lower.contains("33b") {
            return Complexity::Complex;
        }

        Complexity::Moderate
    }

    /// Recommend a hardware class for a bucketed prompt
    ///
    /// Queue depths let busy preferred targets spill over; battery state
    /// steers the expensive buckets toward cheaper silicon.
    #[must_use]
    pub fn recommend_backend(
        &self,
        complexity: Complexity,
        on_battery: bool,
        queue_depth: &HashMap<HardwareClass, usize>,
    ) -> HardwareClass {
        let depth = |class: HardwareClass| queue_depth.get(&class).copied().unwrap_or(0);

        match complexity {
            Complexity::Simple => {
                if depth(HardwareClass::Npu) < 3 {
                    HardwareClass::Npu
                } else {
                    HardwareClass::Igpu
                }
            }
            Complexity::Moderate => {
                if depth(HardwareClass::Igpu) < 2 {
                    HardwareClass::Igpu
                } else if on_battery {
                    HardwareClass::Npu
                } else {
                    HardwareClass::DiscreteGpu
                }
            }
            Complexity::Complex => {
                if on_battery && depth(HardwareClass::DiscreteGpu) > 1 {
                    HardwareClass::Igpu
                } else {
                    HardwareClass::DiscreteGpu
                }
            }
        }
    }

    /// Rough output-size estimate in tokens
    #[must_use]
    pub fn estimate_token_count(&self, prompt: &str) -> u32 {
        let lower = prompt.to_lowercase();
        if lower.contains("one word") {
            5
        } else if lower.contains("one sentence") {
            20
        } else if lower.contains("paragraph") {
            100
        } else if lower.contains("essay") || lower.contains("article") {
            500
        } else {
            (prompt.len() as u32 / 4) * 2
        }
    }
}

// ============================================================================
// LLM-Backed Classifier
// ============================================================================

/// Fixed instruction sent to the delegate model
const CLASSIFY_PROMPT: &str = "Classify the complexity of the following request. \
Respond with exactly one word: simple, moderate, or complex.\n\nRequest: ";

/// Classifier that asks a small model instead of using string heuristics
pub struct LlmClassifier {
    backend: Arc<dyn Backend>,
    model: String,
}

impl LlmClassifier {
    /// Delegate classification to `model` on `backend`
    pub fn new(backend: Arc<dyn Backend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }

    /// Ask the delegate model; unrecognized output or backend errors fall
    /// back to Moderate
    pub async fn classify(&self, prompt: &str) -> Complexity {
        let request = GenerateRequest::new(format!("{CLASSIFY_PROMPT}{prompt}"), &self.model)
            .with_max_tokens(4)
            .with_temperature(0.0);

        let cancel = CancelToken::new();
        match self.backend.generate(&request, &cancel).await {
            Ok(response) => parse_complexity_word(&response.text),
            Err(e) => {
                tracing::debug!(error = %e, "LLM classifier failed, defaulting to moderate");
                Complexity::Moderate
            }
        }
    }
}

fn parse_complexity_word(text: &str) -> Complexity {
    match text.trim().to_lowercase().as_str() {
        "simple" => Complexity::Simple,
        "moderate" => Complexity::Moderate,
        "complex" => Complexity::Complex,
        _ => Complexity::Moderate,
    }
}
