//! Response Confidence Estimation
//!
//! Post-generation quality heuristic that drives escalation. The overall
//! score is a weighted sum of three sub-scores (response length, uncertainty
//! patterns in the text, model capability) and lives in [0, 1]. The
//! router escalates when the score falls strictly below the configured
//! threshold.
//!
//! A cheaper prompt-only estimator is also provided for pre-generation
//! gating: it compares prompt complexity against model capability without
//! having to run the model first.

use serde::{Deserialize, Serialize};

// ============================================================================
// Configuration
// ============================================================================

/// Tuning for the confidence estimator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    /// Responses shorter than this score below 1.0
    pub min_length_chars: usize,
    /// Responses longer than this score 0.9
    pub max_length_chars: usize,
    /// Weight of the length sub-score
    pub length_weight: f64,
    /// Weight of the pattern sub-score
    pub pattern_weight: f64,
    /// Weight of the model sub-score
    pub model_weight: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            min_length_chars: 50,
            max_length_chars: 500,
            length_weight: 0.4,
            pattern_weight: 0.4,
            model_weight: 0.2,
        }
    }
}

// ============================================================================
// Score
// ============================================================================

/// The composite confidence score for one response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    /// Weighted overall score in [0, 1]
    pub overall: f64,
    /// Length sub-score
    pub length_score: f64,
    /// Uncertainty-pattern sub-score
    pub pattern_score: f64,
    /// Model-capability sub-score
    pub model_score: f64,
    /// Every uncertainty signal that matched
    pub uncertainty_labels: Vec<String>,
    /// Human-readable summary of how the score came about
    pub reasoning: String,
}

impl ConfidenceScore {
    /// Whether the router should escalate: strictly below the threshold
    #[must_use]
    pub fn should_escalate(&self, threshold: f64) -> bool {
        self.overall < threshold
    }
}

// ============================================================================
// Pattern Tables
// ============================================================================

/// (phrase, penalty) pairs for uncertainty language
const UNCERTAINTY_PHRASES: &[(&str, f64)] = &[
    ("i don't know", 0.4),
    ("i'm not sure", 0.3),
    ("i cannot", 0.3),
    ("i can't", 0.3),
    ("unclear", 0.2),
    ("uncertain", 0.2),
    ("perhaps", 0.1),
    ("maybe", 0.1),
    ("possibly", 0.1),
    ("might be", 0.1),
    ("could be", 0.1),
    ("i think", 0.05),
    ("it seems", 0.05),
];

const INCOMPLETE_MARKERS: &[&str] = &["...", "[incomplete]", "[truncated]"];

const ERROR_MARKERS: &[&str] = &["error:", "exception:", "failed to", "unable to"];

const TECHNICAL_KEYWORDS: &[&str] = &[
    "function",
    "algorithm",
    "variable",
    "parameter",
    "database",
    "server",
    "protocol",
    "compile",
    "runtime",
    "thread",
    "memory",
    "latency",
    "throughput",
    "encryption",
    "kernel",
];

/// Phrases that indicate a complex prompt, for the pre-generation estimator
const COMPLEXITY_INDICATORS: &[&str] = &[
    "analyze",
    "compare",
    "explain in depth",
    "comprehensive",
    "detailed",
    "step by step",
    "architecture",
    "trade-off",
    "optimize",
    "prove",
    "derive",
    "design a",
    "implement",
    "evaluate",
];

// ============================================================================
// Estimator
// ============================================================================

/// Confidence estimator with fixed pattern tables and configurable weights
#[derive(Clone, Debug, Default)]
pub struct ConfidenceEstimator {
    config: ConfidenceConfig,
}

impl ConfidenceEstimator {
    /// Create with the given configuration
    #[must_use]
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    /// Score a generated response
    #[must_use]
    pub fn estimate(
        &self,
        _prompt: &str,
        response: &str,
        model: &str,
        backend_id: &str,
    ) -> ConfidenceScore {
        let mut labels = Vec::new();

        let length_score = self.length_score(response);
        let pattern_score = self.pattern_score(response, &mut labels);
        let model_score = model_score(model, response);

        let overall = (self.config.length_weight * length_score
            + self.config.pattern_weight * pattern_score
            + self.config.model_weight * model_score)
            .clamp(0.0, 1.0);

        let reasoning = format!(
            "length {:.2} (len {}), patterns {:.2} ({} signals), model {:.2} ({model} on {backend_id})",
            length_score,
            response.len(),
            pattern_score,
            labels.len(),
            model_score,
        );

        ConfidenceScore {
            overall,
            length_score,
            pattern_score,
            model_score,
            uncertainty_labels: labels,
            reasoning,
        }
    }

    fn length_score(&self, response: &str) -> f64 {
        let len = response.len();
        if len < 20 {
            0.1
        } else if len < self.config.min_length_chars {
            0.5 + (len as f64 / self.config.min_length_chars as f64) * 0.5
        } else if len <= self.config.max_length_chars {
            1.0
        } else {
            0.9
        }
    }

    fn pattern_score(&self, response: &str, labels: &mut Vec<String>) -> f64 {
        let lower = response.to_lowercase();
        let mut score = 1.0;

        for (phrase, penalty) in UNCERTAINTY_PHRASES {
            if lower.contains(phrase) {
                score -= penalty;
                labels.push(format!("uncertainty phrase: \"{phrase}\""));
            }
        }

        // Category penalties apply once regardless of how many markers match
        if let Some(marker) = INCOMPLETE_MARKERS.iter().find(|m| lower.contains(*m)) {
            score -= 0.3;
            labels.push(format!("incomplete marker: \"{marker}\""));
        }
        if let Some(marker) = ERROR_MARKERS.iter().find(|m| lower.contains(*m)) {
            score -= 0.5;
            labels.push(format!("error marker: \"{marker}\""));
        }

        if has_structured_content(response) {
            score += 0.1;
        }
        if has_technical_content(&lower) {
            score += 0.1;
        }

        score.clamp(0.0, 1.0)
    }

    /// Cheap prompt-only estimate for pre-generation gating
    ///
    /// Counts complexity indicators (0.2 each) against the model's
    /// capability score; an over-matched model returns 0.5, otherwise the
    /// capability value itself.
    #[must_use]
    pub fn estimate_for_prompt(&self, prompt: &str, model: &str) -> f64 {
        let lower = prompt.to_lowercase();
        let complexity = COMPLEXITY_INDICATORS
            .iter()
            .filter(|k| lower.contains(*k))
            .count() as f64
            * 0.2;

        let capability = model_capability(model);

        if complexity > capability {
            0.5
        } else {
            capability
        }
    }
}

/// Capability score by model size marker
fn model_capability(model: &str) -> f64 {
    let lower = model.to_lowercase();
    if lower.contains("70b") {
        1.0
    } else if lower.contains("7b") {
        0.8
    } else if lower.contains("1.5b") {
        0.6
    } else if lower.contains("0.5b") {
        0.4
    } else {
        0.8
    }
}

/// Model sub-score for post-generation scoring
fn model_score(model: &str, response: &str) -> f64 {
    let lower = model.to_lowercase();

    if lower.starts_with("claude-") || lower.starts_with("gpt-4") {
        return 1.0;
    }
    if lower.contains("405b") || lower.contains("70b") {
        return 1.0;
    }
    if lower.contains("6.7b") || lower.contains("7b") {
        return 0.9;
    }
    if lower.contains("0.5b") || lower.contains("1.5b") {
        // Small models stretched past ~200 words get marked down
        let words = response.split_whitespace().count();
        return if words > 200 { 0.7 } else { 0.8 };
    }
    0.8
}

fn has_structured_content(response: &str) -> bool {
    response.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with('#')
            || trimmed.starts_with("- ")
            || trimmed.starts_with("* ")
            || trimmed
                .split_once(". ")
                .is_some_and(|(head, _)| head.chars().all(|c| c.is_ascii_digit()) && !head.is_empty())
    })
}

fn has_technical_content(lower: &str) -> bool {
    if lower.contains("```") {
        return true;
    }
    TECHNICAL_KEYWORDS
        .iter()
        .filter(|k| lower.contains(*k))
        .count()
        >= 3
}
