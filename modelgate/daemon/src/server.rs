//! Daemon Server Assembly
//!
//! Builds the running system out of a validated [`GatewayConfig`]: registry,
//! policy engine, router, health-check loop, rate limiter with its cleanup
//! task, and the transport accept loop. Owns graceful shutdown: a SIGINT or
//! SIGTERM stops the accept loop, cancels the background tasks, and stops
//! every backend.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use modelgate_core::routing::HealthChecker;
use modelgate_core::{
    BackendRegistry, CancelToken, GatewayConfig, PolicyEngine, RateLimiter, Router, SessionConfig,
    ThermalGate, TransportServer,
};

/// How often the deep health check runs
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// The assembled daemon
pub struct DaemonServer {
    registry: Arc<BackendRegistry>,
    transport: TransportServer,
    health: Arc<HealthChecker>,
    limiter: Arc<RateLimiter>,
}

impl DaemonServer {
    /// Build every component from a validated config and start the backends
    pub async fn build(config: GatewayConfig) -> Result<Self> {
        let registry = Arc::new(BackendRegistry::new());

        for entry in config.enabled_backends() {
            let backend = entry
                .build()
                .with_context(|| format!("building backend {}", entry.id))?;
            registry
                .register(backend.clone())
                .with_context(|| format!("registering backend {}", entry.id))?;

            if let Err(e) = backend.start().await {
                warn!(backend = %entry.id, error = %e, "Backend start failed, health loop will retry");
            }
        }

        let estimator =
            modelgate_core::ConfidenceEstimator::new(config.routing.confidence.clone());
        let thermal = Arc::new(ThermalGate::new(config.thermal.enabled));

        let mut router = Router::new(
            registry.clone(),
            config.routing.default_backend.clone(),
            config.routing.forwarding.clone(),
        )
        .with_estimator(estimator)
        .with_thermal_gate(thermal);

        if config.routing.power_aware {
            router = router.with_policy(Arc::new(PolicyEngine::new()));
        }
        let router = Arc::new(router);

        let limiter = Arc::new(RateLimiter::new(config.server.rate_limit.clone()));
        let health = Arc::new(HealthChecker::new(registry.clone()));
        let transport = TransportServer::new(router, limiter.clone(), SessionConfig::default());

        Ok(Self {
            registry,
            transport,
            health,
            limiter,
        })
    }

    /// Serve until SIGINT/SIGTERM, then shut down cleanly
    pub async fn run(self, listen: &str) -> Result<()> {
        let health_stop = self.health.clone().spawn_loop(HEALTH_CHECK_INTERVAL);
        let cleanup_stop = self.limiter.clone().spawn_cleanup();
        let shutdown = CancelToken::new();

        let signal_shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            info!("Shutdown signal received");
            signal_shutdown.cancel();
        });

        let result = self.transport.serve(listen, shutdown).await;

        health_stop.cancel();
        cleanup_stop.cancel();
        self.registry.stop_all().await;
        info!("All backends stopped");

        result.context("transport server")
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Cannot install SIGTERM handler, falling back to ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> GatewayConfig {
        GatewayConfig::from_toml(
            r#"
                [server]
                grpc_port = 50051
                http_port = 8080
                host = "127.0.0.1"

                [[backends]]
                id = "a"
                type = "ollama"
                name = "A"
                hardware = "igpu"
                endpoint = "http://localhost:1"

                [backends.characteristics]
                power_watts = 12.0
                avg_latency_ms = 300
                max_tokens_per_sec = 22.0
                priority = 60

                [routing]
                default_backend = "a"
            "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_registers_backends() {
        let server = DaemonServer::build(test_config()).await.unwrap();
        assert_eq!(server.registry.len(), 1);
        assert!(server.registry.contains("a"));
    }

    #[tokio::test]
    async fn test_build_skips_disabled_backends() {
        let mut config = test_config();
        config.backends.push({
            let mut extra = config.backends[0].clone();
            extra.id = "off".to_string();
            extra.enabled = false;
            extra
        });

        let server = DaemonServer::build(config).await.unwrap();
        assert_eq!(server.registry.len(), 1);
        assert!(!server.registry.contains("off"));
    }
}
