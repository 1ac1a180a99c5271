//! Model Pattern Filter
//!
//! Decides whether a backend serves a given model name. The pattern language
//! is deliberately small: exact match, universal `*`, prefix `P*`, suffix
//! `*S`, and contains `*X*`. Excluded patterns always win over supported
//! patterns, and an empty supported list accepts anything not excluded.

use serde::{Deserialize, Serialize};

/// Model support filter declared by a backend
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFilter {
    /// Patterns the backend serves; empty means "any not excluded"
    #[serde(default)]
    pub supported_patterns: Vec<String>,
    /// Patterns the backend refuses; these take precedence
    #[serde(default)]
    pub excluded_patterns: Vec<String>,
    /// Models the backend prefers when the router has a free choice
    #[serde(default)]
    pub preferred_models: Vec<String>,
}

impl ModelFilter {
    /// A filter that accepts every model
    #[must_use]
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Build a filter from supported patterns only
    pub fn supporting<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            supported_patterns: patterns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add an excluded pattern
    #[must_use]
    pub fn excluding(mut self, pattern: impl Into<String>) -> Self {
        self.excluded_patterns.push(pattern.into());
        self
    }

    /// Whether the backend serves `model`
    ///
    /// Excluded patterns are checked first and force a `false`; an empty
    /// supported list accepts any model that survived exclusion.
    #[must_use]
    pub fn supports_model(&self, model: &str) -> bool {
        for pattern in &self.excluded_patterns {
            if pattern_matches(pattern, model) {
                return false;
            }
        }

        if self.supported_patterns.is_empty() {
            return true;
        }

        self.supported_patterns
            .iter()
            .any(|p| pattern_matches(p, model))
    }

    /// Whether `model` is on the preferred list
    #[must_use]
    pub fn prefers(&self, model: &str) -> bool {
        self.preferred_models.iter().any(|m| m == model)
    }
}

/// Match a single pattern against a model name
///
/// Forms: exact, `*` (universal), `P*` (prefix), `*S` (suffix), `*X*`
/// (contains). Anything else is treated as an exact match.
#[must_use]
pub fn pattern_matches(pattern: &str, model: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let starts = pattern.starts_with('*');
    let ends = pattern.ends_with('*');

    match (starts, ends) {
        (true, true) if pattern.len() >= 2 => {
            let inner = &pattern[1..pattern.len() - 1];
            inner.is_empty() || model.contains(inner)
        }
        (false, true) => model.starts_with(&pattern[..pattern.len() - 1]),
        (true, false) => model.ends_with(&pattern[1..]),
        _ => pattern == model,
    }
}
