//! Routing Test Utilities
//!
//! A scripted [`MockBackend`] for exercising the router, breaker, health
//! checker and transport without real model servers. Mocks can be configured
//! to answer with a fixed response, fail with a transport error, delay, or
//! stream their response word by word.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::backend::{
    Backend, BackendCore, Capability, CapabilitySet, EmbedRequest, EmbedResponse, GenerateRequest,
    GenerateResponse, GenerationStats, HardwareClass, ModelFilter, StreamChunk, StreamHandle,
};
use crate::cancel::CancelToken;
use crate::error::BackendError;

/// Scripted backend for tests
pub struct MockBackend {
    core: BackendCore,
    response: String,
    fail_transport: bool,
    delay: Duration,
    calls: AtomicU64,
}

impl MockBackend {
    /// A healthy mock that answers "ok"
    #[must_use]
    pub fn healthy(id: &str) -> Self {
        Self {
            core: BackendCore::new(id, "mock", format!("Mock {id}"), HardwareClass::Igpu)
                .with_characteristics(12.0, 100, 50, 8.0),
            response: "ok".to_string(),
            fail_transport: false,
            delay: Duration::ZERO,
            calls: AtomicU64::new(0),
        }
    }

    /// A mock whose every call fails with a transport error
    #[must_use]
    pub fn failing(id: &str) -> Self {
        Self {
            fail_transport: true,
            ..Self::healthy(id)
        }
    }

    /// Fix the response text
    #[must_use]
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Set power, declared latency and priority
    #[must_use]
    pub fn with_characteristics(mut self, power_watts: f64, latency_ms: u64, priority: u8) -> Self {
        self.core = self
            .core
            .with_characteristics(power_watts, latency_ms, priority, 8.0);
        self
    }

    /// Set the hardware class
    #[must_use]
    pub fn with_hardware(mut self, hardware: HardwareClass) -> Self {
        self.core.hardware_class = hardware;
        self
    }

    /// Restrict supported model patterns
    #[must_use]
    pub fn with_supported_models<const N: usize>(mut self, patterns: [&str; N]) -> Self {
        self.core = self.core.with_model_filter(ModelFilter::supporting(patterns));
        self
    }

    /// Restrict declared capabilities
    #[must_use]
    pub fn with_capabilities(mut self, caps: &[Capability]) -> Self {
        self.core = self.core.with_capabilities(CapabilitySet::from_caps(caps));
        self
    }

    /// Delay every call, for cancellation and timeout tests
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// How many generate/stream/embed calls this mock has served
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn transport_failure(&self) -> BackendError {
        BackendError::Transport {
            backend_id: self.core.id.clone(),
            detail: "mock transport failure".to_string(),
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn core(&self) -> &BackendCore {
        &self.core
    }

    async fn health_check(&self) -> Result<Duration, BackendError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_transport {
            self.core.set_healthy(false);
            return Err(self.transport_failure());
        }
        self.core.set_healthy(true);
        Ok(Duration::from_millis(1))
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: &CancelToken,
    ) -> Result<GenerateResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if self.fail_transport {
            return Err(self.transport_failure());
        }

        if !self.delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(self.delay) => {}
                () = cancel.cancelled() => {
                    return Err(BackendError::Cancelled {
                        backend_id: self.core.id.clone(),
                    });
                }
            }
        }

        let tokens = self.response.split_whitespace().count() as u32;
        Ok(GenerateResponse {
            text: self.response.clone(),
            model: request.model.clone(),
            stats: GenerationStats {
                time_to_first_token_ms: 5,
                total_time_ms: 10,
                tokens_generated: tokens,
                tokens_per_second: f64::from(tokens) * 100.0,
                energy_wh: 0.0,
            },
        })
    }

    async fn generate_stream(
        &self,
        _request: &GenerateRequest,
        cancel: &CancelToken,
    ) -> Result<StreamHandle, BackendError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if self.fail_transport {
            return Err(self.transport_failure());
        }

        let (tx, rx) = mpsc::channel(16);
        let words: Vec<String> = self
            .response
            .split_whitespace()
            .map(|w| format!("{w} "))
            .collect();
        let backend_id = self.core.id.clone();
        let cancel = cancel.clone();
        let delay = self.delay;

        tokio::spawn(async move {
            let count = words.len() as u32;
            for word in words {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if cancel.is_cancelled() {
                    let _ = tx
                        .send(Err(BackendError::Cancelled {
                            backend_id: backend_id.clone(),
                        }))
                        .await;
                    return;
                }
                if tx.send(Ok(StreamChunk::token(word))).await.is_err() {
                    return;
                }
            }
            let _ = tx
                .send(Ok(StreamChunk::terminal(GenerationStats {
                    time_to_first_token_ms: 5,
                    total_time_ms: 10,
                    tokens_generated: count,
                    tokens_per_second: f64::from(count) * 100.0,
                    energy_wh: 0.0,
                })))
                .await;
        });

        Ok(rx)
    }

    async fn embed(
        &self,
        request: &EmbedRequest,
        _cancel: &CancelToken,
    ) -> Result<EmbedResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if self.fail_transport {
            return Err(self.transport_failure());
        }

        Ok(EmbedResponse {
            embedding: vec![0.1, 0.2, 0.3],
            model: request.model.clone(),
        })
    }
}
