//! Retry policy and per-operation outcome.
//!
//! # Responsibilities
//! - Describe how often and how patiently a command is retried
//! - Carry the final outcome of a command back to the caller
//!
//! # Design Decisions
//! - The policy is caller-supplied per call; the controller holds none
//! - Only errors classified transient are retried (see `Error::is_transient`)
//! - The outcome records attempts and elapsed time so callers can explain
//!   failures without knowing the retry internals

use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::config::schema::RetryConfig;
use crate::error::{Error, ErrorKind};
use crate::protocol::{Response, Status};
use crate::resilience::backoff::calculate_backoff;

/// How many attempts a command gets and how long to wait between them.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Uniform jitter as a fraction of the delay, in `[0, 1]`.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(1),
            jitter_fraction: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before `attempt` (0-based; attempt 0 never waits).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self)
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_fraction: config.jitter_fraction,
        }
    }
}

/// Final outcome of one `execute` call.
#[derive(Debug)]
pub struct OperationResult {
    pub operation_id: Uuid,
    pub outcome: Result<Response, Error>,
    /// Attempts that reached the pool; a circuit-open rejection is not one.
    pub attempts_used: u32,
    pub total_elapsed: Duration,
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn response(&self) -> Option<&Response> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&Error> {
        self.outcome.as_ref().err()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(Error::kind)
    }

    pub fn into_result(self) -> Result<Response, Error> {
        self.outcome
    }

    /// One line a status display can show as is.
    pub fn summary(&self) -> String {
        let retried = match self.attempts_used {
            0 | 1 => String::new(),
            n => format!(", retried {} times", n - 1),
        };
        match &self.outcome {
            Ok(response) => format!("{} ok{retried}", response.operation()),
            Err(Error::DeviceRejected {
                status: Status::Unavailable,
            }) => format!("device busy{retried}"),
            Err(Error::Authentication) | Err(Error::AuthenticationRequired) => {
                "authentication failed, check password".to_string()
            }
            Err(Error::CircuitOpen { .. }) => {
                "projector marked unreachable, waiting before retrying".to_string()
            }
            Err(e) => format!("{e}{retried}"),
        }
    }

    /// Serializable view for logs and the CLI.
    pub fn report(&self) -> OperationReport {
        OperationReport {
            operation_id: self.operation_id,
            success: self.is_success(),
            attempts_used: self.attempts_used,
            elapsed_ms: self.total_elapsed.as_millis() as u64,
            summary: self.summary(),
            response: self.response().cloned(),
            error_kind: self.error_kind(),
            error: self.error().map(ToString::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    pub operation_id: Uuid,
    pub success: bool,
    pub attempts_used: u32,
    pub elapsed_ms: u64,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
