//! Configuration for the Aranet4 Prometheus exporter.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use aranet_bridge::{
    ExponentialBackoff, FixedInterval, GatewayOptions, RetryPolicy, SimulationConfig,
};
use aranet_common::{DeviceAddress, LoggingConfig, load_config, parse_config};

use crate::mapping::{is_valid_label_name, sanitize_metric_name};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] aranet_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExporterConfig {
    /// Which sensor to read.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Polling and transaction settings.
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sensor selection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceConfig {
    /// Bluetooth MAC address, e.g. "D4:6B:3C:00:11:22".
    #[serde(default)]
    pub address: Option<String>,

    /// Behaviour of the simulated sensor.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// How the bridge reconciles device reads with scrapes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BridgeMode {
    /// Poll in the background and serve the cached reading.
    #[default]
    Push,
    /// Read the device inside each scrape.
    Pull,
}

impl BridgeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeMode::Push => "push",
            BridgeMode::Pull => "pull",
        }
    }
}

impl std::fmt::Display for BridgeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bridge behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSettings {
    /// Push or pull (default: push).
    #[serde(default)]
    pub mode: BridgeMode,

    /// Seconds between polls in push mode (default: 60).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Budget for one device transaction in milliseconds (default: 10000).
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Budget for closing a session in milliseconds (default: 2000).
    #[serde(default = "default_close_timeout")]
    pub close_timeout_ms: u64,

    /// Treat a failed identity exchange as a failed read (default: false).
    #[serde(default)]
    pub identify_required: bool,

    /// Delay policy between failed polls.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_read_timeout() -> u64 {
    10_000
}

fn default_close_timeout() -> u64 {
    2_000
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            mode: BridgeMode::default(),
            poll_interval_secs: default_poll_interval(),
            read_timeout_ms: default_read_timeout(),
            close_timeout_ms: default_close_timeout(),
            identify_required: false,
            retry: RetryConfig::default(),
        }
    }
}

impl BridgeSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Gateway settings derived from this section.
    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            timeout: self.read_timeout(),
            close_timeout: self.close_timeout(),
            identify_required: self.identify_required,
        }
    }
}

/// Retry policy selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryKind {
    /// Retry after the regular poll interval.
    #[default]
    Fixed,
    /// Double the delay after each consecutive failure.
    Exponential,
}

/// Retry settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub policy: RetryKind,

    /// Upper bound for exponential backoff in seconds (default: 900).
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
}

fn default_max_delay() -> u64 {
    900
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            policy: RetryKind::default(),
            max_delay_secs: default_max_delay(),
        }
    }
}

impl RetryConfig {
    /// Build the configured policy.
    pub fn build(&self) -> Box<dyn RetryPolicy> {
        match self.policy {
            RetryKind::Fixed => Box::new(FixedInterval),
            RetryKind::Exponential => Box::new(ExponentialBackoff::new(Duration::from_secs(
                self.max_delay_secs,
            ))),
        }
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9111").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Labels added to every series. Built-in labels win on conflict.
    #[serde(default)]
    pub default_labels: HashMap<String, String>,

    /// Metric name prefix (default: "aranet4").
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_listen() -> String {
    "0.0.0.0:9111".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    "aranet4".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            default_labels: HashMap::new(),
            prefix: default_prefix(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// A missing device address is accepted here since it may still be
    /// supplied on the command line; see [`device_address`](Self::device_address).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(address) = &self.device.address {
            address
                .parse::<DeviceAddress>()
                .map_err(|e| ConfigError::Validation(e.to_string()))?;
        }

        self.device
            .simulation
            .validate()
            .map_err(|e| ConfigError::Validation(format!("device.simulation: {}", e)))?;

        if self.bridge.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_secs must be > 0".to_string(),
            ));
        }

        if self.bridge.read_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "read_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.bridge.close_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "close_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.bridge.retry.max_delay_secs == 0 {
            return Err(ConfigError::Validation(
                "retry.max_delay_secs must be > 0".to_string(),
            ));
        }

        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if ["/health", "/ready", "/status"].contains(&self.prometheus.path.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Metrics path {} collides with a built-in endpoint",
                self.prometheus.path
            )));
        }

        if self.prometheus.prefix.is_empty()
            || sanitize_metric_name(&self.prometheus.prefix) != self.prometheus.prefix
        {
            return Err(ConfigError::Validation(format!(
                "Invalid metric prefix: {}",
                self.prometheus.prefix
            )));
        }

        for name in self.prometheus.default_labels.keys() {
            if !is_valid_label_name(name) {
                return Err(ConfigError::Validation(format!(
                    "Invalid default label name: {}",
                    name
                )));
            }
        }

        Ok(())
    }

    /// The configured device address.
    pub fn device_address(&self) -> Result<DeviceAddress, ConfigError> {
        let address = self.device.address.as_deref().ok_or_else(|| {
            ConfigError::Validation(
                "device.address is required (set it in the config or pass --address)".to_string(),
            )
        })?;

        address
            .parse()
            .map_err(|e: aranet_common::Error| ConfigError::Validation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = ExporterConfig::parse("{}").unwrap();

        assert_eq!(config.prometheus.listen, "0.0.0.0:9111");
        assert_eq!(config.prometheus.path, "/metrics");
        assert_eq!(config.prometheus.prefix, "aranet4");
        assert_eq!(config.bridge.mode, BridgeMode::Push);
        assert_eq!(config.bridge.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.bridge.read_timeout(), Duration::from_secs(10));
        assert!(!config.bridge.identify_required);
        assert_eq!(config.bridge.retry.policy, RetryKind::Fixed);
        assert!(config.device.address.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            device: {
                address: "d4-6b-3c-00-11-22",
                simulation: { name: "Aranet4 Office", latency_ms: 200, failure_rate: 0.1 }
            },
            bridge: {
                mode: "pull",
                poll_interval_secs: 120,
                read_timeout_ms: 5000,
                identify_required: true,
                retry: { policy: "exponential", max_delay_secs: 600 }
            },
            prometheus: {
                listen: "127.0.0.1:9112",
                path: "/probe/metrics",
                prefix: "office",
                default_labels: { room: "kitchen" }
            },
            logging: { level: "debug", format: "json" }
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(
            config.device_address().unwrap().to_string(),
            "D4:6B:3C:00:11:22"
        );
        assert_eq!(config.device.simulation.name, "Aranet4 Office");
        assert_eq!(config.device.simulation.latency_ms, 200);
        assert_eq!(config.bridge.mode, BridgeMode::Pull);
        assert_eq!(config.bridge.poll_interval_secs, 120);
        assert_eq!(config.bridge.read_timeout(), Duration::from_secs(5));
        assert!(config.bridge.identify_required);
        assert_eq!(config.bridge.retry.policy, RetryKind::Exponential);
        assert_eq!(config.bridge.retry.build().name(), "exponential");
        assert_eq!(config.prometheus.listen, "127.0.0.1:9112");
        assert_eq!(config.prometheus.prefix, "office");
        assert_eq!(
            config.prometheus.default_labels.get("room"),
            Some(&"kitchen".to_string())
        );
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, aranet_common::LogFormat::Json);
    }

    #[test]
    fn test_validate_malformed_address() {
        let result = ExporterConfig::parse(r#"{ device: { address: "AA:BB:CC" } }"#);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_missing_address() {
        let config = ExporterConfig::parse("{}").unwrap();
        let err = config.device_address().unwrap_err();
        assert!(err.to_string().contains("device.address is required"));
    }

    #[test]
    fn test_validate_invalid_listen() {
        let result = ExporterConfig::parse(r#"{ prometheus: { listen: "not-an-address" } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_validate_invalid_path() {
        let result = ExporterConfig::parse(r#"{ prometheus: { path: "no-leading-slash" } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must start with /")
        );
    }

    #[test]
    fn test_validate_zero_read_timeout() {
        let result = ExporterConfig::parse(r#"{ bridge: { read_timeout_ms: 0 } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let result = ExporterConfig::parse(r#"{ bridge: { poll_interval_secs: 0 } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_bad_prefix_and_labels() {
        assert!(ExporterConfig::parse(r#"{ prometheus: { prefix: "air quality" } }"#).is_err());
        assert!(
            ExporterConfig::parse(r#"{ prometheus: { default_labels: { "1room": "x" } } }"#)
                .is_err()
        );
    }

    #[test]
    fn test_validate_simulation_failure_rate() {
        let result =
            ExporterConfig::parse(r#"{ device: { simulation: { failure_rate: 2.0 } } }"#);
        assert!(result.unwrap_err().to_string().contains("failure_rate"));
    }

    #[test]
    fn test_unknown_mode_is_parse_error() {
        let result = ExporterConfig::parse(r#"{ bridge: { mode: "sideways" } }"#);
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let result = ExporterConfig::load_from_file("/nonexistent/exporter.json5");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
        assert!(err.to_string().contains("/nonexistent/exporter.json5"));
    }
}
