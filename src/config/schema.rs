//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::net::Endpoint;
use crate::protocol::DEFAULT_PORT;

/// Root configuration for the PJLink client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Connection pool limits, per projector.
    pub pool: PoolSettings,

    /// Circuit breaker settings, per projector.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Default retry policy.
    pub retries: RetryConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Known projectors, addressable by name.
    pub projectors: Vec<ProjectorConfig>,
}

impl ClientConfig {
    /// Look up a projector by name.
    pub fn projector(&self, name: &str) -> Option<&ProjectorConfig> {
        self.projectors.iter().find(|p| p.name == name)
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Connections kept open proactively.
    pub min_size: usize,

    /// Hard cap on open connections per projector.
    pub max_size: usize,

    /// Idle connections older than this are closed, in milliseconds.
    pub idle_timeout_ms: u64,

    /// A connection is retired after this many commands.
    pub max_uses_per_connection: u64,

    /// How often the reaper sweeps, in milliseconds.
    pub reaper_interval_ms: u64,

    /// Probe idle connections during each sweep.
    pub health_check_idle: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 2,
            idle_timeout_ms: 20_000,
            max_uses_per_connection: 100,
            reaper_interval_ms: 5_000,
            health_check_idle: true,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// How long the circuit stays open before a probe, in milliseconds.
    pub open_duration_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_ms: 30_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, the first one included.
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,

    /// Growth factor between retries.
    pub multiplier: f64,

    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,

    /// Random jitter as a fraction of the delay.
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 1_000,
            jitter_fraction: 0.1,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP connect plus greeting, in milliseconds.
    pub connect_ms: u64,

    /// Waiting for one response line, in milliseconds.
    pub read_ms: u64,

    /// Idle connection probe, in milliseconds.
    pub health_check_ms: u64,

    /// Whole operation including retries, in milliseconds.
    pub operation_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 3_000,
            read_ms: 5_000,
            health_check_ms: 1_000,
            operation_ms: 15_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9464".to_string(),
        }
    }
}

/// One projector.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectorConfig {
    /// Unique name used on the command line.
    pub name: String,

    /// Hostname or IP address.
    pub host: String,

    /// PJLink port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Plaintext PJLink password, if the projector requires one.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl ProjectorConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(config.pool.max_size, 2);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.retries.max_attempts, 3);
        assert_eq!(config.timeouts.read_ms, 5_000);
        assert!(!config.observability.metrics_enabled);
        assert!(config.projectors.is_empty());
    }

    #[test]
    fn projectors_parse_with_default_port() {
        let config: ClientConfig = toml::from_str(
            r#"
            [pool]
            max_size = 4

            [[projectors]]
            name = "hall"
            host = "10.0.0.20"
            password = "JBMIAProjectorLink"

            [[projectors]]
            name = "lab"
            host = "10.0.0.21"
            port = 14352
            "#,
        )
        .unwrap();

        assert_eq!(config.pool.max_size, 4);
        assert_eq!(config.pool.min_size, 0);
        let hall = config.projector("hall").unwrap();
        assert_eq!(hall.endpoint(), Endpoint::new("10.0.0.20", 4352));
        assert_eq!(hall.password.as_deref(), Some("JBMIAProjectorLink"));
        assert_eq!(config.projector("lab").unwrap().port, 14352);
        assert!(config.projector("attic").is_none());
    }
}
