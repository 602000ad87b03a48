//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the controller from validated configuration
//! - Start background tasks (pool reaper, metrics exporter)
//! - Stop them again in order
//!
//! # Design Decisions
//! - Fail fast: configuration errors surface before anything starts
//! - Metrics and logging are initialized by the binary, not here, so
//!   embedding applications keep control of global state

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::controller::{ControllerConfig, ResilientController};
use crate::lifecycle::Shutdown;
use crate::resilience::RetryPolicy;

/// A controller plus the background tasks that keep its pools tidy.
pub struct ClientRuntime {
    controller: ResilientController,
    retry_policy: RetryPolicy,
    operation_timeout: Duration,
    shutdown: Shutdown,
    reaper: Option<JoinHandle<()>>,
}

impl ClientRuntime {
    /// Build the controller and start the reaper.
    pub fn start(config: &ClientConfig) -> Self {
        let controller = ResilientController::new(ControllerConfig::from(config));
        let shutdown = Shutdown::new();
        let reaper = controller.spawn_reaper(shutdown.subscribe());

        tracing::info!(
            projectors = config.projectors.len(),
            max_pool_size = config.pool.max_size,
            failure_threshold = config.circuit_breaker.failure_threshold,
            "PJLink client started"
        );

        Self {
            controller,
            retry_policy: RetryPolicy::from(&config.retries),
            operation_timeout: Duration::from_millis(config.timeouts.operation_ms),
            shutdown,
            reaper: Some(reaper),
        }
    }

    pub fn controller(&self) -> &ResilientController {
        &self.controller
    }

    /// Retry policy from the configuration.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Stop the reaper and close every pool.
    pub async fn stop(mut self) {
        self.shutdown.trigger();
        if let Some(reaper) = self.reaper.take() {
            if let Err(e) = reaper.await {
                tracing::warn!(error = %e, "Reaper task ended abnormally");
            }
        }
        self.controller.close_all();
        tracing::info!("PJLink client stopped");
    }
}
