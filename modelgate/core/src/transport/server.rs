//! Transport Server
//!
//! TCP accept loop for the framed streaming transport. Each accepted
//! connection is rate-limit checked by client IP, then handed its own
//! [`Session`] task. Shutdown is cooperative: cancelling the server token
//! stops accepting and lets in-flight sessions drain on their own
//! cancellation paths.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use super::frame::ResponseFrame;
use super::rate_limit::{extract_client_ip, RateLimiter};
use super::session::{Session, SessionConfig};
use super::TransportError;
use crate::cancel::CancelToken;
use crate::error::{GatewayError, PipelineError};
use crate::routing::Router;

/// The framed-transport TCP server
pub struct TransportServer {
    router: Arc<Router>,
    limiter: Arc<RateLimiter>,
    session_config: SessionConfig,
}

impl TransportServer {
    /// Create a server
    #[must_use]
    pub fn new(router: Arc<Router>, limiter: Arc<RateLimiter>, session_config: SessionConfig) -> Self {
        Self {
            router,
            limiter,
            session_config,
        }
    }

    /// Bind and serve until `shutdown` trips
    pub async fn serve(&self, addr: &str, shutdown: CancelToken) -> Result<(), TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Io(format!("bind {addr}: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        tracing::info!(addr = %local, "Transport server listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_session(stream, peer.to_string()),
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                        }
                    }
                }
                () = shutdown.cancelled() => {
                    tracing::info!("Transport server shutting down");
                    return Ok(());
                }
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, peer: String) {
        let client_ip = extract_client_ip(None, None, &peer);

        if !self.limiter.allow(&client_ip) {
            tracing::debug!(client = %client_ip, "Connection shed by rate limiter");
            tokio::spawn(async move {
                let _ = reject_rate_limited(stream, &client_ip).await;
            });
            return;
        }

        let router = self.router.clone();
        let config = self.session_config.clone();
        tokio::spawn(async move {
            let _ = stream.set_nodelay(true);
            let (read, write) = stream.into_split();
            let session = Session::new(read, write, router, config, peer.clone());
            match session.run().await {
                Ok(()) => tracing::debug!(peer = %peer, "Session ended"),
                Err(TransportError::ConnectionClosed) => {
                    tracing::debug!(peer = %peer, "Session closed by peer");
                }
                Err(e) => tracing::warn!(peer = %peer, error = %e, "Session failed"),
            }
        });
    }
}

/// Tell a shed client why before hanging up
async fn reject_rate_limited(stream: TcpStream, client_ip: &str) -> Result<(), TransportError> {
    use tokio::io::AsyncWriteExt;

    let error = GatewayError::from(PipelineError::RateLimited {
        client: client_ip.to_string(),
    });
    let frame = super::frame::encode(&ResponseFrame::error(String::new(), error.to_wire()))?;

    let mut stream = stream;
    stream
        .write_all(&frame)
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?;
    let _ = stream.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendRegistry;
    use crate::routing::test_utils::MockBackend;
    use crate::routing::ForwardingPolicy;
    use crate::transport::frame::{self, FrameDecoder, RequestFrame};
    use crate::transport::rate_limit::RateLimitConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn server_with(
        backends: Vec<MockBackend>,
        rate_limit: RateLimitConfig,
    ) -> Arc<TransportServer> {
        let registry = Arc::new(BackendRegistry::new());
        for b in backends {
            registry.register(Arc::new(b)).unwrap();
        }
        let router = Arc::new(Router::new(registry, "a", ForwardingPolicy::default()));
        Arc::new(TransportServer::new(
            router,
            Arc::new(RateLimiter::new(rate_limit)),
            SessionConfig::default(),
        ))
    }

    async fn read_one_frame(stream: &mut TcpStream) -> ResponseFrame {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before a frame arrived");
            decoder.push(&buf[..n]);
            if let Some(frame) = decoder.decode::<ResponseFrame>().unwrap() {
                return frame;
            }
        }
    }

    #[tokio::test]
    async fn test_end_to_end_over_tcp() {
        let server = server_with(
            vec![MockBackend::healthy("a").with_response("tcp answer")],
            RateLimitConfig::default(),
        );
        let shutdown = CancelToken::new();

        // Bind on an ephemeral port by racing serve against our connect
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let serve_shutdown = shutdown.clone();
        let server_task = {
            let server = server.clone();
            let addr = addr.to_string();
            tokio::spawn(async move { server.serve(&addr, serve_shutdown).await })
        };

        // Give the listener a moment to bind
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = RequestFrame {
            request_id: "t1".to_string(),
            model: "m".to_string(),
            prompt: "p".to_string(),
            options: None,
            stream: false,
            priority: String::new(),
            max_latency_ms: None,
        };
        client
            .write_all(&frame::encode(&request).unwrap())
            .await
            .unwrap();

        let response = read_one_frame(&mut client).await;
        assert_eq!(response.request_id, "t1");
        assert_eq!(response.token, "tcp answer");
        assert!(response.done);

        shutdown.cancel();
        let _ = server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rate_limited_connection_gets_error_frame() {
        // Burst of 1: the second connection is shed
        let server = server_with(
            vec![MockBackend::healthy("a")],
            RateLimitConfig {
                enabled: true,
                rate: 0.001,
                burst: 1.0,
                cleanup_interval_secs: 60,
                expiry_secs: 300,
            },
        );
        let shutdown = CancelToken::new();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let serve_shutdown = shutdown.clone();
        let server_task = {
            let server = server.clone();
            let addr = addr.to_string();
            tokio::spawn(async move { server.serve(&addr, serve_shutdown).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let _first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();

        let frame = read_one_frame(&mut second).await;
        assert!(frame.done);
        assert_eq!(frame.error.unwrap().code, 5006);

        shutdown.cancel();
        let _ = server_task.await.unwrap();
    }
}
