//! Modelgate Daemon - Multi-Backend Inference Proxy
//!
//! Entry point for the modelgate daemon: loads and validates configuration,
//! builds the backend fleet, and serves the framed streaming transport.
//!
//! # Usage
//!
//! ```bash
//! # Start with the default config search path
//! modelgate-daemon
//!
//! # Explicit config file
//! modelgate-daemon --config /etc/modelgate/config.toml
//!
//! # Override the transport listen address
//! modelgate-daemon --listen 0.0.0.0:8080
//!
//! # Verbose logging
//! RUST_LOG=debug modelgate-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: graceful shutdown (stop accepting, stop backends)

mod server;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use modelgate_core::GatewayConfig;

use server::DaemonServer;

/// Modelgate daemon - multi-backend inference proxy and router
#[derive(Parser, Debug)]
#[command(name = "modelgate-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "MODELGATE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Transport listen address override (host:port)
    #[arg(short = 'L', long, env = "MODELGATE_LISTEN", value_name = "ADDR")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "MODELGATE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Resolve configuration: explicit path, default path, or built-in defaults
fn resolve_config(args: &Args) -> Result<GatewayConfig> {
    if let Some(ref path) = args.config {
        return GatewayConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()));
    }

    if let Some(default_path) = GatewayConfig::default_path() {
        if default_path.exists() {
            return GatewayConfig::load(&default_path)
                .with_context(|| format!("loading config from {}", default_path.display()));
        }
    }

    warn!("No config file found, using built-in defaults (local Ollama on :11434)");
    let config = builtin_default_config();
    config.validate().context("built-in default config")?;
    Ok(config)
}

/// A runnable default: one local Ollama-style iGPU backend
fn builtin_default_config() -> GatewayConfig {
    let toml = r#"
        [server]
        grpc_port = 50051
        http_port = 8080
        host = "127.0.0.1"

        [[backends]]
        id = "local-ollama"
        type = "ollama"
        name = "Local Ollama"
        hardware = "igpu"
        endpoint = "http://localhost:11434"

        [backends.characteristics]
        power_watts = 12.0
        avg_latency_ms = 400
        max_tokens_per_sec = 22.0
        priority = 60

        [routing]
        default_backend = "local-ollama"
    "#;
    // The built-in text is compiled in; a parse failure here is a programming
    // error, not a runtime condition.
    GatewayConfig::from_toml(toml).expect("built-in default config must parse")
}

fn init_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("modelgate_core={level},modelgate_daemon={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = resolve_config(&args)?;
    let listen = args
        .listen
        .clone()
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.http_port));

    info!(
        listen = %listen,
        backends = config.backends.len(),
        "Starting modelgate daemon"
    );

    let server = DaemonServer::build(config)
        .await
        .context("building daemon from config")?;

    server.run(&listen).await.context("serving transport")?;

    info!("Daemon exited cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_default_config_is_valid() {
        let config = builtin_default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.routing.default_backend, "local-ollama");
    }

    #[test]
    fn test_resolve_explicit_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
                [server]
                grpc_port = 50051
                http_port = 9090
                host = "127.0.0.1"

                [[backends]]
                id = "b"
                type = "ollama"
                name = "B"
                hardware = "cpu"
                endpoint = "http://localhost:11434"
            "#,
        )
        .unwrap();

        let args = Args {
            config: Some(path),
            listen: None,
            log_level: "info".to_string(),
        };
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.server.http_port, 9090);
    }

    #[test]
    fn test_resolve_missing_explicit_config_fails() {
        let args = Args {
            config: Some(PathBuf::from("/no/such/config.toml")),
            listen: None,
            log_level: "info".to_string(),
        };
        assert!(resolve_config(&args).is_err());
    }
}
