//! Configuration management for the sidecar worker
//!
//! Provides a layered configuration system: defaults, then an optional
//! YAML file, then environment variables with the `SIDECAR_` prefix.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// How the request pipeline admits concurrent requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// Every admitted request proceeds immediately
    Parallel,
    /// At most one request in flight; arrivals queue FIFO
    Exclusive,
}

/// Action taken when the model server logs an unrecoverable error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashPolicy {
    /// Keep running; every request is rejected with a fail-fast 503
    Flag,
    /// Exit nonzero so the supervisor replaces this instance
    Exit,
}

/// Complete configuration for the sidecar worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker identity
    pub worker: IdentityConfig,

    /// Model server endpoint and log source
    pub model_server: ModelServerConfig,

    /// Adapter family fronting the model server (e.g. `text_generation`)
    pub model_family: String,

    /// Request admission mode
    pub gate_mode: GateMode,

    /// Capacity benchmark settings
    pub benchmark: BenchmarkConfig,

    /// Autoscaler telemetry settings
    pub autoscaler: AutoscalerConfig,

    /// Log monitor settings
    pub monitor: MonitorConfig,

    /// Worker-facing HTTP server settings
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Worker identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Unique worker identifier, reported to the autoscaler
    pub id: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            id: format!("worker-{}", &uuid::Uuid::new_v4().to_string()[..8]),
        }
    }
}

/// Model server endpoint and log source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelServerConfig {
    /// Base URL of the local inference server
    pub url: String,

    /// Path to the inference server's log file
    pub log_path: PathBuf,

    /// Timeout for a single upstream request (seconds). Streamed responses
    /// are only bounded on connection establishment, not body duration.
    pub request_timeout_seconds: u64,
}

impl ModelServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Join an endpoint path onto the base URL
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(crate::Error::config("Model server URL cannot be empty"));
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(crate::Error::config(format!(
                "Model server URL must be http(s): {}",
                self.url
            )));
        }
        if self.log_path.as_os_str().is_empty() {
            return Err(crate::Error::config("Model server log path cannot be empty"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(crate::Error::config("Request timeout must be > 0"));
        }
        Ok(())
    }
}

impl Default for ModelServerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5001".to_string(),
            log_path: PathBuf::from("model-server.log"),
            request_timeout_seconds: 120,
        }
    }
}

/// Capacity benchmark settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Number of synthetic runs after the server first becomes ready
    pub runs: u32,

    /// Capacity assumed until calibration succeeds (units/second)
    pub default_units_per_second: f64,
}

impl BenchmarkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_units_per_second <= 0.0 {
            return Err(crate::Error::config(
                "Default capacity must be > 0 units/second",
            ));
        }
        Ok(())
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            runs: 3,
            default_units_per_second: 1.0,
        }
    }
}

/// Autoscaler telemetry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscalerConfig {
    /// Enable telemetry pushes
    pub enabled: bool,

    /// Autoscaler endpoint receiving worker status updates
    pub url: Option<String>,

    /// Bearer token identifying this worker
    pub token: Option<String>,

    /// Push at least this often even without request activity (seconds)
    pub report_interval_seconds: u64,
}

impl AutoscalerConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_seconds.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.enabled {
            if self.url.as_deref().unwrap_or("").is_empty() {
                return Err(crate::Error::config(
                    "Autoscaler URL required when telemetry is enabled",
                ));
            }
            if self.token.as_deref().unwrap_or("").is_empty() {
                return Err(crate::Error::config(
                    "Autoscaler token required when telemetry is enabled",
                ));
            }
        }
        Ok(())
    }
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            token: None,
            report_interval_seconds: 10,
        }
    }
}

/// What to do when a model server log line matches a rule's pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    /// Startup-complete marker: the model finished loading
    ModelLoaded,
    /// Progress visibility only, no state change
    Info,
    /// Known-fatal marker: the model server is beyond recovery
    ModelError,
}

/// One (action, substring) log classification rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRule {
    pub action: LogAction,
    pub pattern: String,
}

impl LogRule {
    pub fn new(action: LogAction, pattern: impl Into<String>) -> Self {
        Self {
            action,
            pattern: pattern.into(),
        }
    }
}

/// Log monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Poll interval for newly appended log lines (milliseconds)
    pub poll_interval_ms: u64,

    /// Action on an unrecoverable model error
    pub crash_policy: CrashPolicy,

    /// Classification rules; when empty, the adapter family's defaults apply
    pub rules: Vec<LogRule>,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            crash_policy: CrashPolicy::Flag,
            rules: Vec::new(),
        }
    }
}

/// Worker-facing HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the worker listens on
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables with the `SIDECAR_` prefix (highest)
    /// 2. Configuration file
    /// 3. Defaults (lowest)
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        // Start with defaults
        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        // Add configuration file if it exists
        if let Ok(config_path) = std::env::var("SIDECAR_CONFIG") {
            builder = builder.add_source(config::File::with_name(&config_path).required(false));
        } else {
            for path in &["./sidecar.yaml", "/etc/sidecar/config.yaml"] {
                builder = builder.add_source(config::File::with_name(path).required(false));
            }
        }

        // Add environment variables with SIDECAR_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("SIDECAR")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(path));

        let config = builder.build()?;
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.worker.id.is_empty() {
            return Err(crate::Error::config("Worker id cannot be empty"));
        }
        if self.model_family.is_empty() {
            return Err(crate::Error::config("Model family cannot be empty"));
        }
        self.model_server.validate()?;
        self.benchmark.validate()?;
        self.autoscaler.validate()?;
        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker: IdentityConfig::default(),
            model_server: ModelServerConfig::default(),
            model_family: "text_generation".to_string(),
            gate_mode: GateMode::Exclusive,
            benchmark: BenchmarkConfig::default(),
            autoscaler: AutoscalerConfig::default(),
            monitor: MonitorConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gate_mode, GateMode::Exclusive);
        assert_eq!(config.monitor.crash_policy, CrashPolicy::Flag);
        assert!(config.worker.id.starts_with("worker-"));
    }

    #[test]
    fn test_endpoint_join() {
        let config = ModelServerConfig {
            url: "http://127.0.0.1:5001/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.endpoint("/generate"), "http://127.0.0.1:5001/generate");
    }

    #[test]
    fn test_model_server_validation() {
        let mut config = WorkerConfig::default();
        assert!(config.validate().is_ok());

        config.model_server.url = String::new();
        assert!(config.validate().is_err());

        config.model_server.url = "ftp://somewhere".to_string();
        assert!(config.validate().is_err());

        config.model_server.url = "http://127.0.0.1:5001".to_string();
        config.model_server.request_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_autoscaler_validation() {
        let mut config = WorkerConfig::default();
        config.autoscaler.enabled = true;
        assert!(config.validate().is_err());

        config.autoscaler.url = Some("https://autoscaler.example.com/worker_status".to_string());
        assert!(config.validate().is_err());

        config.autoscaler.token = Some("master-token".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_benchmark_validation() {
        let mut config = WorkerConfig::default();
        config.benchmark.default_units_per_second = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = WorkerConfig::default();

        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: WorkerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.gate_mode, deserialized.gate_mode);
        assert_eq!(config.model_server.url, deserialized.model_server.url);

        let json = serde_json::to_string(&config).unwrap();
        let deserialized: WorkerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.server.bind_addr, deserialized.server.bind_addr);
    }

    #[test]
    fn test_gate_mode_names() {
        let json = serde_json::to_string(&GateMode::Exclusive).unwrap();
        assert_eq!(json, "\"exclusive\"");
        let parsed: CrashPolicy = serde_json::from_str("\"exit\"").unwrap();
        assert_eq!(parsed, CrashPolicy::Exit);
    }
}
