//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, sizes consistent, fractions bounded)
//! - Check projector entries (unique names, usable addresses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::ClientConfig;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `pool.max_size`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check every rule and report every violation.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let pool = &config.pool;
    if pool.max_size == 0 {
        errors.push(ValidationError::new("pool.max_size", "must be at least 1"));
    }
    if pool.min_size > pool.max_size {
        errors.push(ValidationError::new(
            "pool.min_size",
            format!("{} exceeds max_size {}", pool.min_size, pool.max_size),
        ));
    }
    if pool.max_uses_per_connection == 0 {
        errors.push(ValidationError::new("pool.max_uses_per_connection", "must be at least 1"));
    }
    if pool.idle_timeout_ms == 0 {
        errors.push(ValidationError::new("pool.idle_timeout_ms", "must be greater than 0"));
    }
    if pool.reaper_interval_ms == 0 {
        errors.push(ValidationError::new("pool.reaper_interval_ms", "must be greater than 0"));
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be at least 1"));
    }
    if breaker.open_duration_ms == 0 {
        errors.push(ValidationError::new("circuit_breaker.open_duration_ms", "must be greater than 0"));
    }

    let retries = &config.retries;
    if retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }
    if !(retries.multiplier >= 1.0) || !retries.multiplier.is_finite() {
        errors.push(ValidationError::new("retries.multiplier", "must be a finite number >= 1.0"));
    }
    if !(0.0..=1.0).contains(&retries.jitter_fraction) {
        errors.push(ValidationError::new("retries.jitter_fraction", "must be between 0 and 1"));
    }
    if retries.base_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            format!("{} exceeds max_delay_ms {}", retries.base_delay_ms, retries.max_delay_ms),
        ));
    }

    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.connect_ms", timeouts.connect_ms),
        ("timeouts.read_ms", timeouts.read_ms),
        ("timeouts.health_check_ms", timeouts.health_check_ms),
        ("timeouts.operation_ms", timeouts.operation_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    let mut names = HashSet::new();
    for (i, projector) in config.projectors.iter().enumerate() {
        let field = |name: &str| format!("projectors[{i}].{name}");
        if projector.name.trim().is_empty() {
            errors.push(ValidationError::new(field("name"), "must not be empty"));
        } else if !names.insert(projector.name.as_str()) {
            errors.push(ValidationError::new(
                field("name"),
                format!("duplicate projector name '{}'", projector.name),
            ));
        }
        if projector.host.trim().is_empty() {
            errors.push(ValidationError::new(field("host"), "must not be empty"));
        }
        if projector.port == 0 {
            errors.push(ValidationError::new(field("port"), "must not be 0"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ProjectorConfig;

    fn projector(name: &str, host: &str, port: u16) -> ProjectorConfig {
        ProjectorConfig {
            name: name.to_string(),
            host: host.to_string(),
            port,
            password: None,
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&ClientConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_error() {
        let mut config = ClientConfig::default();
        config.pool.max_size = 0;
        config.pool.min_size = 1;
        config.retries.jitter_fraction = 1.5;
        config.retries.multiplier = 0.5;
        config.timeouts.read_ms = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            [
                "pool.max_size",
                "pool.min_size",
                "retries.multiplier",
                "retries.jitter_fraction",
                "timeouts.read_ms",
            ]
        );
    }

    #[test]
    fn rejects_duplicate_and_blank_projectors() {
        let mut config = ClientConfig::default();
        config.projectors = vec![
            projector("hall", "10.0.0.1", 4352),
            projector("hall", "10.0.0.2", 4352),
            projector("", " ", 0),
        ];
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors[0].message.contains("duplicate"));
        assert_eq!(errors[1].field, "projectors[2].name");
        assert_eq!(errors[3].to_string(), "projectors[2].port: must not be 0");
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = ClientConfig::default();
        config.observability.metrics_address = "not an address".to_string();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "observability.metrics_address");
    }

    #[test]
    fn base_delay_must_not_exceed_max() {
        let mut config = ClientConfig::default();
        config.retries.base_delay_ms = 5_000;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "retries.base_delay_ms");
    }
}
