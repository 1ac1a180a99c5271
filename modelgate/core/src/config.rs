//! Configuration
//!
//! Serde/toml types for the whole gateway surface and the validation rules
//! that gate startup. A config that fails validation is a fatal 4xxx error;
//! nothing is ever half-started on a bad config.
//!
//! Resolution order for the config file: an explicit `--config` path, else
//! `$XDG_CONFIG_HOME/modelgate/config.toml`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{
    Backend, BackendCore, CapabilitySet, HardwareClass, ModelFilter, OllamaBackend,
};
use crate::error::ConfigError;
use crate::routing::{ConfidenceConfig, ForwardingPolicy};
use crate::transport::RateLimitConfig;

// ============================================================================
// Top Level
// ============================================================================

/// The whole gateway configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listener and middleware settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Backend fleet
    #[serde(default)]
    pub backends: Vec<BackendEntry>,
    /// Routing and forwarding behavior
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Thermal thresholds
    #[serde(default)]
    pub thermal: ThermalConfig,
    /// Efficiency mode
    #[serde(default)]
    pub efficiency: EfficiencyConfig,
    /// Monitoring endpoints
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

// ============================================================================
// Server
// ============================================================================

/// Listener and middleware settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC listen port
    pub grpc_port: u16,
    /// HTTP / framed-transport listen port
    pub http_port: u16,
    /// Bind host
    pub host: String,
    /// TLS termination
    #[serde(default)]
    pub tls: TlsConfig,
    /// API-key middleware
    #[serde(default)]
    pub auth: AuthConfig,
    /// Ingress rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_port: 50051,
            http_port: 8080,
            host: "127.0.0.1".to_string(),
            tls: TlsConfig::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// TLS settings; cert and key must exist when enabled
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Whether TLS is terminated here
    #[serde(default)]
    pub enabled: bool,
    /// Server certificate path
    #[serde(default)]
    pub cert_file: String,
    /// Server key path
    #[serde(default)]
    pub key_file: String,
    /// Optional client CA for mutual TLS
    #[serde(default)]
    pub client_ca_file: String,
}

/// API-key middleware settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Whether keys are required
    #[serde(default)]
    pub enabled: bool,
    /// key -> metadata
    #[serde(default)]
    pub api_keys: HashMap<String, ApiKeyEntry>,
}

/// One API key's metadata
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    /// Display name for audit logs
    pub name: String,
    /// Permission strings
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Disabled keys are rejected with 403
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl AuthConfig {
    /// Look up a presented credential, accepting `Bearer <k>`, `bearer <k>`
    /// or the bare key. Comparison against stored keys is constant-time.
    ///
    /// Returns the matching entry, or `None` when nothing matches.
    #[must_use]
    pub fn resolve_key(&self, header_value: &str) -> Option<&ApiKeyEntry> {
        let presented = header_value
            .strip_prefix("Bearer ")
            .or_else(|| header_value.strip_prefix("bearer "))
            .unwrap_or(header_value)
            .trim();

        self.api_keys
            .iter()
            .find(|(stored, _)| constant_time_eq(stored.as_bytes(), presented.as_bytes()))
            .map(|(_, entry)| entry)
    }
}

/// Constant-time byte comparison so key probing cannot time-leak
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// ============================================================================
// Backends
// ============================================================================

/// One backend in the fleet
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BackendEntry {
    /// Unique id, the registry key
    pub id: String,
    /// Variant: "ollama" is built in; others arrive via the registry API
    #[serde(rename = "type")]
    pub backend_type: String,
    /// Human-readable name
    pub name: String,
    /// Hardware class: npu | igpu | discrete-gpu | cpu | cloud
    pub hardware: String,
    /// Disabled entries are ignored entirely
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// HTTP endpoint for network backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Device node for local accelerator backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Model file path for local backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
    /// Model name for local backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    /// Cost/perf characteristics
    #[serde(default)]
    pub characteristics: Characteristics,
    /// Model support filter
    #[serde(default)]
    pub model_capability: ModelCapability,
}

/// Declared cost/perf characteristics
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Characteristics {
    /// Draw under load, watts
    #[serde(default)]
    pub power_watts: f64,
    /// Typical request latency
    #[serde(default)]
    pub avg_latency_ms: u64,
    /// Peak throughput
    #[serde(default)]
    pub max_tokens_per_sec: f64,
    /// Scheduling priority, higher wins
    #[serde(default)]
    pub priority: u8,
}

/// Model support filter as configured
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelCapability {
    /// Largest loadable model in GB
    #[serde(default)]
    pub max_model_size_gb: f64,
    /// Patterns served; empty = any not excluded
    #[serde(default)]
    pub supported_patterns: Vec<String>,
    /// Models preferred when the router has a free choice
    #[serde(default)]
    pub preferred_models: Vec<String>,
    /// Patterns refused; these win
    #[serde(default)]
    pub excluded_patterns: Vec<String>,
}

impl BackendEntry {
    /// Instantiate the configured backend
    ///
    /// Only the Ollama-style HTTP variant is built in; other types register
    /// through the admin path with their own implementations.
    pub fn build(&self) -> Result<Arc<dyn Backend>, ConfigError> {
        let hardware = HardwareClass::parse(&self.hardware).ok_or_else(|| ConfigError::Invalid {
            detail: format!("backend {}: unknown hardware class {:?}", self.id, self.hardware),
        })?;

        let core = BackendCore::new(&self.id, &self.backend_type, &self.name, hardware)
            .with_capabilities(CapabilitySet::text())
            .with_model_filter(ModelFilter {
                supported_patterns: self.model_capability.supported_patterns.clone(),
                excluded_patterns: self.model_capability.excluded_patterns.clone(),
                preferred_models: self.model_capability.preferred_models.clone(),
            })
            .with_characteristics(
                self.characteristics.power_watts,
                self.characteristics.avg_latency_ms,
                self.characteristics.priority,
                self.model_capability.max_model_size_gb,
            );

        match self.backend_type.as_str() {
            "ollama" => {
                let endpoint = self.endpoint.as_deref().ok_or_else(|| ConfigError::Invalid {
                    detail: format!("backend {}: ollama type requires an endpoint", self.id),
                })?;
                let backend =
                    OllamaBackend::new(core, endpoint).map_err(|e| ConfigError::Invalid {
                        detail: format!("backend {}: {e}", self.id),
                    })?;
                Ok(Arc::new(backend))
            }
            other => Err(ConfigError::Invalid {
                detail: format!("backend {}: unsupported backend type {other:?}", self.id),
            }),
        }
    }
}

// ============================================================================
// Routing
// ============================================================================

/// Routing and forwarding behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Backend preferred among equal candidates
    pub default_backend: String,
    /// Whether the power budget engine runs
    #[serde(default = "default_true")]
    pub power_aware: bool,
    /// Strategy name recorded for operators; routing itself is capability
    /// driven
    #[serde(default)]
    pub fallback_strategy: String,
    /// Prefer observed latency over declared latency once metrics exist
    #[serde(default = "default_true")]
    pub auto_optimize_latency: bool,
    /// Confidence-triggered escalation
    #[serde(default)]
    pub forwarding: ForwardingPolicy,
    /// Confidence estimator tuning
    #[serde(default)]
    pub confidence: ConfidenceConfig,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_backend: String::new(),
            power_aware: true,
            fallback_strategy: "escalate".to_string(),
            auto_optimize_latency: true,
            forwarding: ForwardingPolicy::default(),
            confidence: ConfidenceConfig::default(),
        }
    }
}

// ============================================================================
// Thermal / Efficiency / Monitoring
// ============================================================================

/// Thermal thresholds, strictly ordered
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThermalConfig {
    /// Whether the thermal gate is active
    #[serde(default)]
    pub enabled: bool,
    /// Temperature thresholds in Celsius
    #[serde(default)]
    pub temperature: TemperatureThresholds,
    /// Fan curve points
    #[serde(default)]
    pub fan: FanLevels,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            temperature: TemperatureThresholds::default(),
            fan: FanLevels::default(),
        }
    }
}

/// warning < critical < shutdown
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemperatureThresholds {
    /// Log and prefer cooler backends
    pub warning: f64,
    /// Thermal gate closes for high-power backends
    pub critical: f64,
    /// Stop dispatching entirely
    pub shutdown: f64,
}

impl Default for TemperatureThresholds {
    fn default() -> Self {
        Self {
            warning: 70.0,
            critical: 85.0,
            shutdown: 95.0,
        }
    }
}

/// quiet <= moderate <= loud fan duty points
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FanLevels {
    /// Duty at idle
    pub quiet: u8,
    /// Duty under sustained load
    pub moderate: u8,
    /// Duty near critical temperature
    pub loud: u8,
}

impl Default for FanLevels {
    fn default() -> Self {
        Self {
            quiet: 30,
            moderate: 60,
            loud: 100,
        }
    }
}

/// Power/performance trade-off presets
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EfficiencyMode {
    /// Maximum throughput, ignore power
    Performance,
    /// Balanced defaults
    #[default]
    Balanced,
    /// Prefer low power
    Efficiency,
    /// Prefer low fan noise
    Quiet,
    /// Follow platform power state
    Auto,
    /// Lowest possible draw
    UltraEfficiency,
}

/// Efficiency settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EfficiencyConfig {
    /// Whether the mode influences routing
    #[serde(default)]
    pub enabled: bool,
    /// Active mode
    #[serde(default)]
    pub default_mode: EfficiencyMode,
}

/// Monitoring endpoints
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Whether monitoring endpoints are served
    #[serde(default)]
    pub enabled: bool,
    /// Prometheus scrape port; 0 disables
    #[serde(default)]
    pub prometheus_port: u16,
    /// Log filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Whether the pprof-style profiler endpoint is served
    #[serde(default)]
    pub pprof_enabled: bool,
    /// Profiler port
    #[serde(default)]
    pub pprof_port: u16,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prometheus_port: 0,
            log_level: default_log_level(),
            pprof_enabled: false,
            pprof_port: 0,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl GatewayConfig {
    /// Default config file location under the user config directory
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("modelgate").join("config.toml"))
    }

    /// Load and validate from an explicit path
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.display().to_string(),
                }
            } else {
                ConfigError::ParseFailed {
                    detail: format!("{}: {e}", path.display()),
                }
            }
        })?;
        Self::from_toml(&text)
    }

    /// Parse and validate from TOML text
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::ParseFailed {
            detail: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Enabled backend entries
    pub fn enabled_backends(&self) -> impl Iterator<Item = &BackendEntry> {
        self.backends.iter().filter(|b| b.enabled)
    }

    /// Apply every validation rule; the first violation fails startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |detail: String| Err(ConfigError::Invalid { detail });

        // Ports: non-zero and mutually distinct
        if self.server.grpc_port == 0 || self.server.http_port == 0 {
            return invalid("server ports must be in [1, 65535]".to_string());
        }
        if self.server.grpc_port == self.server.http_port {
            return invalid(format!(
                "grpc_port and http_port must differ (both {})",
                self.server.grpc_port
            ));
        }
        if self.monitoring.prometheus_port != 0
            && (self.monitoring.prometheus_port == self.server.grpc_port
                || self.monitoring.prometheus_port == self.server.http_port)
        {
            return invalid(format!(
                "prometheus_port {} collides with a server port",
                self.monitoring.prometheus_port
            ));
        }

        // TLS files must exist when enabled
        if self.server.tls.enabled {
            for (label, file) in [
                ("cert_file", &self.server.tls.cert_file),
                ("key_file", &self.server.tls.key_file),
            ] {
                if file.is_empty() {
                    return invalid(format!("tls enabled but {label} is not set"));
                }
                if !Path::new(file).exists() {
                    return invalid(format!("tls {label} does not exist: {file}"));
                }
            }
        }

        // Backends: at least one enabled, unique ids, sane characteristics
        let enabled: Vec<&BackendEntry> = self.enabled_backends().collect();
        if enabled.is_empty() {
            return invalid("at least one enabled backend is required".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for backend in &self.backends {
            if !seen.insert(backend.id.as_str()) {
                return invalid(format!("duplicate backend id: {}", backend.id));
            }
            if HardwareClass::parse(&backend.hardware).is_none() {
                return invalid(format!(
                    "backend {}: unknown hardware class {:?}",
                    backend.id, backend.hardware
                ));
            }
            if backend.characteristics.power_watts < 0.0
                || backend.characteristics.max_tokens_per_sec < 0.0
                || backend.model_capability.max_model_size_gb < 0.0
            {
                return invalid(format!(
                    "backend {}: characteristics must be non-negative",
                    backend.id
                ));
            }
        }

        // Confidence weights in [0, 1]
        let c = &self.routing.confidence;
        for (label, weight) in [
            ("length_weight", c.length_weight),
            ("pattern_weight", c.pattern_weight),
            ("model_weight", c.model_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return invalid(format!("confidence {label} {weight} outside [0, 1]"));
            }
        }

        // Default and escalation backends must be enabled
        let enabled_ids: std::collections::HashSet<&str> =
            enabled.iter().map(|b| b.id.as_str()).collect();
        if !self.routing.default_backend.is_empty()
            && !enabled_ids.contains(self.routing.default_backend.as_str())
        {
            return invalid(format!(
                "default_backend {:?} is not an enabled backend",
                self.routing.default_backend
            ));
        }
        for target in &self.routing.forwarding.escalation_path {
            if !enabled_ids.contains(target.as_str()) {
                return invalid(format!(
                    "escalation target {target:?} is not an enabled backend"
                ));
            }
        }

        // Thermal thresholds strictly ordered, fan levels weakly ordered
        let t = &self.thermal.temperature;
        if !(t.warning < t.critical && t.critical < t.shutdown) {
            return invalid(format!(
                "thermal thresholds must be strictly ordered: warning {} < critical {} < shutdown {}",
                t.warning, t.critical, t.shutdown
            ));
        }
        let f = &self.thermal.fan;
        if !(f.quiet <= f.moderate && f.moderate <= f.loud) {
            return invalid(format!(
                "fan levels must be weakly ordered: quiet {} <= moderate {} <= loud {}",
                f.quiet, f.moderate, f.loud
            ));
        }

        Ok(())
    }
}
