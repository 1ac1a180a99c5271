//! Backend Registry
//!
//! Typed set of live backends keyed by id. Many readers, few writers:
//! registration and removal happen at startup or on admin events, while every
//! request iterates a snapshot. Snapshots never observe a partial update.

use std::sync::Arc;

use dashmap::DashMap;

use super::traits::Backend;
use crate::error::PipelineError;

/// Concurrent registry of dispatch targets
#[derive(Default)]
pub struct BackendRegistry {
    backends: DashMap<String, Arc<dyn Backend>>,
}

impl BackendRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend; a backend appears at most once per id
    pub fn register(&self, backend: Arc<dyn Backend>) -> Result<(), PipelineError> {
        let id = backend.id().to_string();
        match self.backends.entry(id.clone()) {
            dashmap::Entry::Occupied(_) => Err(PipelineError::Invalid {
                detail: format!("backend id already registered: {id}"),
            }),
            dashmap::Entry::Vacant(slot) => {
                slot.insert(backend);
                tracing::info!(backend = %id, "Registered backend");
                Ok(())
            }
        }
    }

    /// Remove a backend, returning it if it was present
    pub fn remove(&self, id: &str) -> Option<Arc<dyn Backend>> {
        let removed = self.backends.remove(id).map(|(_, b)| b);
        if removed.is_some() {
            tracing::info!(backend = %id, "Removed backend");
        }
        removed
    }

    /// Look up a backend by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn Backend>> {
        self.backends.get(id).map(|b| b.clone())
    }

    /// Whether the id is registered
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.backends.contains_key(id)
    }

    /// Point-in-time snapshot of all backends, ordered by id for
    /// deterministic iteration
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn Backend>> {
        let mut all: Vec<Arc<dyn Backend>> =
            self.backends.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Total registered backends
    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Count of currently healthy backends
    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.backends.iter().filter(|e| e.value().is_healthy()).count()
    }

    /// Stop every backend, logging rather than aborting on individual failures
    pub async fn stop_all(&self) {
        for backend in self.snapshot() {
            if let Err(e) = backend.stop().await {
                tracing::warn!(backend = %backend.id(), error = %e, "Backend stop failed");
            }
        }
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self.backends.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("BackendRegistry").field("ids", &ids).finish()
    }
}
