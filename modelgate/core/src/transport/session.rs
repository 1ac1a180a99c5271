//! Streaming Session
//!
//! One framed duplex connection between a client and the router. Requests
//! arrive as [`RequestFrame`]s; responses leave as [`ResponseFrame`]s,
//! tokenwise on the streaming path with TTFT stamped at the first non-empty
//! token, or as a single terminal frame on the one-shot path.
//!
//! # Lifetimes and cancellation
//!
//! The session owns both halves of the connection, so writes are naturally
//! serialized. Every write is bounded by the per-connection write deadline;
//! a blocked client terminates the session rather than the session holding a
//! backend stream open forever. Client disconnect (read EOF or error) trips
//! the request's cancellation token and drops the backend stream handle, so
//! the producing task dies on its next send.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::frame::{self, FrameDecoder, FrameStats, RequestFrame, ResponseFrame};
use super::TransportError;
use crate::backend::{GenerateRequest, RequestOutcome};
use crate::cancel::CancelToken;
use crate::error::{GatewayError, RequestError};
use crate::routing::{Annotations, RequestPriority, Router};

/// Session tuning
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Ceiling on any single frame write; exceeding it kills the session
    pub write_deadline: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            write_deadline: Duration::from_secs(10),
        }
    }
}

/// A live framed session
pub struct Session<R, W> {
    reader: R,
    writer: W,
    decoder: FrameDecoder,
    router: Arc<Router>,
    config: SessionConfig,
    peer: String,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Bind a connection to the router
    pub fn new(
        reader: R,
        writer: W,
        router: Arc<Router>,
        config: SessionConfig,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            reader,
            writer,
            decoder: FrameDecoder::new(),
            router,
            config,
            peer: peer.into(),
        }
    }

    /// Drive the session until the client disconnects or a fatal transport
    /// error occurs
    pub async fn run(mut self) -> Result<(), TransportError> {
        let mut read_buf = vec![0u8; 16 * 1024];

        loop {
            // Drain every complete frame before touching the socket again
            loop {
                match self.decoder.decode::<RequestFrame>() {
                    Ok(Some(request)) => self.handle_request(request).await?,
                    Ok(None) => break,
                    Err(e) => {
                        // Unparseable input: report and close
                        let wire = GatewayError::from(RequestError::InvalidRequest {
                            detail: e.to_string(),
                        })
                        .to_wire();
                        let _ = self
                            .write_frame(&ResponseFrame::error(String::new(), wire))
                            .await;
                        return Err(e);
                    }
                }
            }

            let n = self
                .reader
                .read(&mut read_buf)
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
            if n == 0 {
                tracing::debug!(peer = %self.peer, "Client disconnected");
                return Ok(());
            }
            self.decoder.push(&read_buf[..n]);
        }
    }

    async fn handle_request(&mut self, request: RequestFrame) -> Result<(), TransportError> {
        let annotations = self.build_annotations(&request);
        let generate = GenerateRequest {
            prompt: request.prompt.clone(),
            model: request.model.clone(),
            options: request.options.clone(),
        };

        tracing::debug!(
            peer = %self.peer,
            request = %request.request_id,
            model = %request.model,
            stream = request.stream,
            "Handling request"
        );

        if request.stream {
            self.handle_streaming(&request, &annotations, &generate).await
        } else {
            self.handle_unary(&request, &annotations, &generate).await
        }
    }

    /// Priority keyword and routing hints become annotations
    fn build_annotations(&self, request: &RequestFrame) -> Annotations {
        let priority = RequestPriority::from_keyword(&request.priority);

        let mut annotations = Annotations {
            request_id: request.request_id.clone(),
            priority,
            latency_critical: priority == RequestPriority::Critical,
            max_latency_ms: request.max_latency_ms,
            model: Some(request.model.clone()),
            ..Annotations::default()
        };

        let hints = self
            .router
            .detector()
            .hints(&request.prompt, &request.model, &annotations);
        annotations.media_type = hints.media_type;
        if hints.profile.prefer_low_latency {
            annotations.latency_critical = true;
        }
        if hints.profile.prefer_low_power {
            annotations.prefer_power_efficiency = true;
        }

        annotations
    }

    async fn handle_unary(
        &mut self,
        request: &RequestFrame,
        annotations: &Annotations,
        generate: &GenerateRequest,
    ) -> Result<(), TransportError> {
        let start = Instant::now();
        let cancel = CancelToken::new();
        if let Some(deadline) = annotations.deadline_ms {
            cancel.trip_after(Duration::from_millis(deadline));
        }

        match self.router.execute(annotations, generate, &cancel).await {
            Ok(result) => {
                let total_ms = start.elapsed().as_millis() as u64;
                let frame = ResponseFrame {
                    request_id: request.request_id.clone(),
                    token: result.response.text,
                    done: true,
                    stats: Some(FrameStats {
                        total_time_ms: total_ms,
                        token_count: 1,
                        tokens_per_sec: if total_ms > 0 {
                            1000.0 / total_ms as f64
                        } else {
                            0.0
                        },
                        ttft_ms: None,
                    }),
                    error: None,
                };
                self.write_frame(&frame).await
            }
            Err(e) => {
                self.write_frame(&ResponseFrame::error(request.request_id.clone(), e.to_wire()))
                    .await
            }
        }
    }

    async fn handle_streaming(
        &mut self,
        request: &RequestFrame,
        annotations: &Annotations,
        generate: &GenerateRequest,
    ) -> Result<(), TransportError> {
        let start = Instant::now();
        let cancel = CancelToken::new();

        let (backend_id, mut handle) = match self
            .router
            .execute_stream(annotations, generate, &cancel)
            .await
        {
            Ok(opened) => opened,
            Err(e) => {
                return self
                    .write_frame(&ResponseFrame::error(request.request_id.clone(), e.to_wire()))
                    .await;
            }
        };

        let mut ttft: Option<u64> = None;
        let mut token_count: u32 = 0;
        let mut read_buf = vec![0u8; 4096];

        loop {
            tokio::select! {
                chunk = handle.recv() => match chunk {
                    Some(Ok(chunk)) if !chunk.done => {
                        if !chunk.token.is_empty() {
                            if ttft.is_none() {
                                ttft = Some(start.elapsed().as_millis() as u64);
                            }
                            token_count += 1;
                        }
                        self.write_frame(&ResponseFrame::token(
                            request.request_id.clone(),
                            chunk.token,
                        ))
                        .await?;
                    }
                    Some(Ok(chunk)) => {
                        // Terminal chunk; prefer the backend's stats counts
                        let total_ms = start.elapsed().as_millis() as u64;
                        let count = chunk
                            .stats
                            .as_ref()
                            .map_or(token_count, |s| s.tokens_generated);
                        let stats = FrameStats {
                            total_time_ms: total_ms,
                            token_count: count,
                            tokens_per_sec: if total_ms > 0 {
                                f64::from(count) * 1000.0 / total_ms as f64
                            } else {
                                0.0
                            },
                            ttft_ms: ttft,
                        };
                        self.record_stream_outcome(&backend_id, start, RequestOutcome::Success);
                        return self
                            .write_frame(&ResponseFrame::terminal(
                                request.request_id.clone(),
                                stats,
                            ))
                            .await;
                    }
                    Some(Err(e)) => {
                        let outcome = if e.is_cancelled() {
                            RequestOutcome::Cancelled
                        } else {
                            RequestOutcome::Error
                        };
                        self.record_stream_outcome(&backend_id, start, outcome);
                        return self
                            .write_frame(&ResponseFrame::error(
                                request.request_id.clone(),
                                GatewayError::from(e).to_wire(),
                            ))
                            .await;
                    }
                    None => {
                        // Producer went away without a terminal chunk
                        let total_ms = start.elapsed().as_millis() as u64;
                        self.record_stream_outcome(&backend_id, start, RequestOutcome::Success);
                        return self
                            .write_frame(&ResponseFrame::terminal(
                                request.request_id.clone(),
                                FrameStats {
                                    total_time_ms: total_ms,
                                    token_count,
                                    tokens_per_sec: 0.0,
                                    ttft_ms: ttft,
                                },
                            ))
                            .await;
                    }
                },
                read = self.reader.read(&mut read_buf) => match read {
                    Ok(0) | Err(_) => {
                        // Client went away mid-stream: cancel the backend
                        // work and drop the handle so the producer exits
                        cancel.cancel();
                        drop(handle);
                        self.record_stream_outcome(&backend_id, start, RequestOutcome::Cancelled);
                        tracing::debug!(
                            peer = %self.peer,
                            request = %request.request_id,
                            "Client disconnected mid-stream"
                        );
                        return Err(TransportError::ConnectionClosed);
                    }
                    Ok(n) => {
                        // Pipelined input; queued for after this stream ends
                        self.decoder.push(&read_buf[..n]);
                    }
                },
            }
        }
    }

    fn record_stream_outcome(&self, backend_id: &str, start: Instant, outcome: RequestOutcome) {
        if let Some(backend) = self.router.registry().get(backend_id) {
            backend.update_metrics(start.elapsed(), outcome);
        }
    }

    /// Write one frame under the connection write deadline
    async fn write_frame(&mut self, response: &ResponseFrame) -> Result<(), TransportError> {
        let bytes = frame::encode(response)?;
        match tokio::time::timeout(self.config.write_deadline, self.writer.write_all(&bytes)).await
        {
            Ok(Ok(())) => {
                // Frames are small; flush so the client sees tokens promptly
                match tokio::time::timeout(self.config.write_deadline, self.writer.flush()).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(TransportError::Io(e.to_string())),
                    Err(_) => Err(TransportError::WriteDeadlineExceeded),
                }
            }
            Ok(Err(e)) => Err(TransportError::Io(e.to_string())),
            Err(_) => {
                tracing::warn!(peer = %self.peer, "Write deadline exceeded, closing session");
                Err(TransportError::WriteDeadlineExceeded)
            }
        }
    }
}
