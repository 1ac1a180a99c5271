//! Ollama-Style HTTP Backend
//!
//! Reference implementation of the backend contract against the native
//! Ollama REST API. This is the one wire implementation the crate ships; it
//! exercises every part of the contract end to end (streaming with TTFT,
//! cancellation, typed failure modes, health probing) so other provider
//! integrations have a worked example to follow.
//!
//! # Wire format
//!
//! - `POST /api/generate`: generation; with `stream: true` the body is
//!   newline-delimited JSON objects, one per token
//! - `POST /api/embeddings`: embedding vectors
//! - `GET /api/tags`: installed models; doubles as the health probe
//!
//! Partial lines at stream EOF are discarded rather than parsed.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::traits::{Backend, BackendCore, StreamHandle};
use super::types::{
    EmbedRequest, EmbedResponse, GenerateRequest, GenerateResponse, GenerationStats, StreamChunk,
};
use crate::cancel::CancelToken;
use crate::error::BackendError;

/// Truncation limit for protocol error bodies carried in errors
const ERROR_BODY_LIMIT: usize = 512;

/// Backend speaking the native Ollama HTTP API
pub struct OllamaBackend {
    core: BackendCore,
    endpoint: String,
    http_client: reqwest::Client,
    request_timeout: Duration,
}

impl OllamaBackend {
    /// Create a backend from a prepared core record and endpoint URL
    /// (e.g. `http://localhost:11434`)
    pub fn new(core: BackendCore, endpoint: impl Into<String>) -> Result<Self, BackendError> {
        let id = core.id.clone();
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| BackendError::Transport {
                backend_id: id,
                detail: format!("http client init: {e}"),
            })?;

        Ok(Self {
            core,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http_client,
            request_timeout: Duration::from_secs(120),
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.endpoint)
    }

    fn embeddings_url(&self) -> String {
        format!("{}/api/embeddings", self.endpoint)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.endpoint)
    }

    fn transport_error(&self, e: &reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout {
                backend_id: self.core.id.clone(),
                elapsed_ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            BackendError::Transport {
                backend_id: self.core.id.clone(),
                detail: e.to_string(),
            }
        }
    }

    /// Turn a non-2xx response into a protocol error with a truncated body
    async fn protocol_error(&self, response: reqwest::Response) -> BackendError {
        let status = response.status().as_u16();
        let mut body = response.text().await.unwrap_or_default();
        body.truncate(ERROR_BODY_LIMIT);
        BackendError::Protocol {
            backend_id: self.core.id.clone(),
            status,
            body,
        }
    }

    fn wire_request(&self, request: &GenerateRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": stream,
        });

        if let Some(ref opts) = request.options {
            let mut options = serde_json::Map::new();
            if let Some(n) = opts.max_tokens {
                options.insert("num_predict".to_string(), n.into());
            }
            if let Some(t) = opts.temperature {
                options.insert("temperature".to_string(), serde_json::json!(t));
            }
            if let Some(p) = opts.top_p {
                options.insert("top_p".to_string(), serde_json::json!(p));
            }
            if let Some(k) = opts.top_k {
                options.insert("top_k".to_string(), k.into());
            }
            if let Some(c) = opts.context_length {
                options.insert("num_ctx".to_string(), c.into());
            }
            if !opts.stop.is_empty() {
                options.insert("stop".to_string(), serde_json::json!(opts.stop));
            }
            if !options.is_empty() {
                body["options"] = serde_json::Value::Object(options);
            }
        }

        body
    }
}

/// One line of the streaming generate response
#[derive(Debug, Deserialize)]
struct WireStreamLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    eval_count: Option<u32>,
}

/// Unary generate response body
#[derive(Debug, Deserialize)]
struct WireGenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireEmbedResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct WireTagsResponse {
    #[serde(default)]
    models: Vec<WireTagModel>,
}

#[derive(Debug, Deserialize)]
struct WireTagModel {
    name: String,
}

#[async_trait]
impl Backend for OllamaBackend {
    fn core(&self) -> &BackendCore {
        &self.core
    }

    async fn health_check(&self) -> Result<Duration, BackendError> {
        let start = Instant::now();
        let result = self
            .http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                // Refresh the loaded-model list while we have the payload
                if let Ok(tags) = response.json::<WireTagsResponse>().await {
                    self.core
                        .metrics()
                        .set_loaded_models(tags.models.into_iter().map(|m| m.name).collect());
                }
                self.core.set_healthy(true);
                Ok(start.elapsed())
            }
            Ok(response) => {
                self.core.set_healthy(false);
                Err(self.protocol_error(response).await)
            }
            Err(e) => {
                self.core.set_healthy(false);
                Err(self.transport_error(&e))
            }
        }
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: &CancelToken,
    ) -> Result<GenerateResponse, BackendError> {
        if !self.supports_model(&request.model) {
            return Err(BackendError::Unsupported {
                backend_id: self.core.id.clone(),
                what: request.model.clone(),
            });
        }

        let start = Instant::now();
        let body = self.wire_request(request, false);

        let send = self
            .http_client
            .post(self.generate_url())
            .timeout(self.request_timeout)
            .json(&body)
            .send();

        let response = tokio::select! {
            r = send => r.map_err(|e| self.transport_error(&e))?,
            () = cancel.cancelled() => {
                return Err(BackendError::Cancelled { backend_id: self.core.id.clone() });
            }
        };

        if !response.status().is_success() {
            return Err(self.protocol_error(response).await);
        }

        let parse = response.json::<WireGenerateResponse>();
        let wire = tokio::select! {
            r = parse => r.map_err(|e| self.transport_error(&e))?,
            () = cancel.cancelled() => {
                return Err(BackendError::Cancelled { backend_id: self.core.id.clone() });
            }
        };

        let total_ms = start.elapsed().as_millis() as u64;
        let tokens = wire.eval_count.unwrap_or(0);

        Ok(GenerateResponse {
            text: wire.response,
            model: request.model.clone(),
            stats: GenerationStats {
                time_to_first_token_ms: total_ms,
                total_time_ms: total_ms,
                tokens_generated: tokens,
                tokens_per_second: if total_ms > 0 {
                    f64::from(tokens) * 1000.0 / total_ms as f64
                } else {
                    0.0
                },
                energy_wh: 0.0,
            },
        })
    }

    async fn generate_stream(
        &self,
        request: &GenerateRequest,
        cancel: &CancelToken,
    ) -> Result<StreamHandle, BackendError> {
        if !self.supports_model(&request.model) {
            return Err(BackendError::Unsupported {
                backend_id: self.core.id.clone(),
                what: request.model.clone(),
            });
        }

        let body = self.wire_request(request, true);
        let start = Instant::now();

        let send = self
            .http_client
            .post(self.generate_url())
            .timeout(self.request_timeout)
            .json(&body)
            .send();

        let response = tokio::select! {
            r = send => r.map_err(|e| self.transport_error(&e))?,
            () = cancel.cancelled() => {
                return Err(BackendError::Cancelled { backend_id: self.core.id.clone() });
            }
        };

        if !response.status().is_success() {
            return Err(self.protocol_error(response).await);
        }

        let (tx, rx) = mpsc::channel(64);
        let backend_id = self.core.id.clone();
        let cancel = cancel.clone();
        let mut byte_stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();
            let mut first_token_at: Option<Instant> = None;
            let mut token_count: u32 = 0;

            loop {
                let chunk = tokio::select! {
                    c = byte_stream.next() => c,
                    () = cancel.cancelled() => {
                        let _ = tx
                            .send(Err(BackendError::Cancelled { backend_id: backend_id.clone() }))
                            .await;
                        return;
                    }
                };

                let bytes = match chunk {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        let _ = tx
                            .send(Err(BackendError::Transport {
                                backend_id: backend_id.clone(),
                                detail: e.to_string(),
                            }))
                            .await;
                        return;
                    }
                    // EOF without a done marker: any partial line left in the
                    // buffer is discarded, never parsed.
                    None => {
                        let elapsed = start.elapsed().as_millis() as u64;
                        let _ = tx
                            .send(Ok(StreamChunk::terminal(stream_stats(
                                start,
                                first_token_at,
                                token_count,
                                elapsed,
                            ))))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }

                    let parsed: WireStreamLine = match serde_json::from_str(&line) {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::debug!(backend = %backend_id, error = %e, "Skipping malformed stream line");
                            continue;
                        }
                    };

                    if !parsed.response.is_empty() {
                        if first_token_at.is_none() {
                            first_token_at = Some(Instant::now());
                        }
                        token_count += 1;
                        if tx.send(Ok(StreamChunk::token(parsed.response))).await.is_err() {
                            // Reader dropped; abandon the HTTP stream
                            return;
                        }
                    }

                    if parsed.done {
                        let elapsed = start.elapsed().as_millis() as u64;
                        let reported = parsed.eval_count.unwrap_or(token_count);
                        let _ = tx
                            .send(Ok(StreamChunk::terminal(stream_stats(
                                start,
                                first_token_at,
                                reported,
                                elapsed,
                            ))))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn embed(
        &self,
        request: &EmbedRequest,
        cancel: &CancelToken,
    ) -> Result<EmbedResponse, BackendError> {
        let body = serde_json::json!({
            "model": request.model,
            "prompt": request.input,
        });

        let send = self
            .http_client
            .post(self.embeddings_url())
            .timeout(self.request_timeout)
            .json(&body)
            .send();

        let response = tokio::select! {
            r = send => r.map_err(|e| self.transport_error(&e))?,
            () = cancel.cancelled() => {
                return Err(BackendError::Cancelled { backend_id: self.core.id.clone() });
            }
        };

        if !response.status().is_success() {
            return Err(self.protocol_error(response).await);
        }

        let wire: WireEmbedResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(&e))?;

        Ok(EmbedResponse {
            embedding: wire.embedding,
            model: request.model.clone(),
        })
    }

    async fn start(&self) -> Result<(), BackendError> {
        // Warm probe; failure is recorded in the health flag but does not
        // block startup, the health loop will keep retrying.
        if let Err(e) = self.health_check().await {
            tracing::warn!(backend = %self.core.id, error = %e, "Initial health probe failed");
        }
        Ok(())
    }
}

fn stream_stats(
    start: Instant,
    first_token_at: Option<Instant>,
    tokens: u32,
    total_ms: u64,
) -> GenerationStats {
    let ttft_ms = first_token_at
        .map(|t| t.duration_since(start).as_millis() as u64)
        .unwrap_or(total_ms);
    GenerationStats {
        time_to_first_token_ms: ttft_ms,
        total_time_ms: total_ms,
        tokens_generated: tokens,
        tokens_per_second: if total_ms > 0 {
            f64::from(tokens) * 1000.0 / total_ms as f64
        } else {
            0.0
        },
        energy_wh: 0.0,
    }
}
