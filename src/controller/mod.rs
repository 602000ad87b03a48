//! Resilient controller: the public entry point for projector commands.
//!
//! # Data Flow
//! ```text
//! execute(endpoint, password, cmd, policy, timeout)
//!     → registry.rs (pool + breaker + class flag for the endpoint)
//!     → breaker.allow()            open → CircuitOpen, no attempt counted
//!     → pool.acquire(deadline)     exhausted → transient
//!     → connection.execute(cmd)    read timeout bounded by the deadline
//!     → classify once:
//!         success            → release healthy, record success
//!         class mismatch     → mark class-1-only, re-send at class 1
//!         terminal error     → release, record failure, stop
//!         transient error    → release, record failure, back off, retry
//! ```
//!
//! # Design Decisions
//! - One absolute deadline per operation; every wait derives from it
//! - Every admitted attempt settles its breaker permit exactly once
//! - Cancellation drops the lease and the permit, which retire the
//!   connection and count a failure

pub mod registry;

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::Error;
use crate::net::Endpoint;
use crate::observability::metrics;
use crate::pool::{PoolConfig, PoolStats, Reaper};
use crate::protocol::{self, Command, DeviceClass, Response, Status};
use crate::resilience::timeouts::step_timeout;
use crate::resilience::{BreakerConfig, BreakerSnapshot, CircuitPhase, OperationResult, RetryPolicy};

pub use registry::{EndpointRegistry, EndpointState};

/// Settings shared by every endpoint the controller talks to.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub pool: PoolConfig,
    pub breaker: BreakerConfig,
    /// Upper bound for one response; the operation deadline may cut it shorter.
    pub read_timeout: Duration,
    pub reaper_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            breaker: BreakerConfig::default(),
            read_timeout: Duration::from_secs(5),
            reaper_interval: Duration::from_secs(5),
        }
    }
}

impl From<&ClientConfig> for ControllerConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            pool: PoolConfig {
                min_size: config.pool.min_size,
                max_size: config.pool.max_size,
                idle_timeout: Duration::from_millis(config.pool.idle_timeout_ms),
                max_uses_per_connection: config.pool.max_uses_per_connection,
                connect_timeout: Duration::from_millis(config.timeouts.connect_ms),
                health_check_timeout: Duration::from_millis(config.timeouts.health_check_ms),
                health_check_idle: config.pool.health_check_idle,
            },
            breaker: BreakerConfig {
                failure_threshold: config.circuit_breaker.failure_threshold,
                open_duration: Duration::from_millis(config.circuit_breaker.open_duration_ms),
            },
            read_timeout: Duration::from_millis(config.timeouts.read_ms),
            reaper_interval: Duration::from_millis(config.pool.reaper_interval_ms),
        }
    }
}

/// Sends commands with pooling, retries, backoff, circuit breaking and
/// Class 2 → Class 1 fallback.
///
/// Each controller owns its registry; two controllers never share pools or
/// breakers.
#[derive(Debug, Clone)]
pub struct ResilientController {
    registry: EndpointRegistry,
    config: ControllerConfig,
}

/// Outcome of the retry loop before it is wrapped into an `OperationResult`.
struct LoopOutcome {
    outcome: Result<Response, Error>,
    attempts: u32,
}

impl LoopOutcome {
    fn done(outcome: Result<Response, Error>, attempts: u32) -> Self {
        Self { outcome, attempts }
    }
}

impl ResilientController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            registry: EndpointRegistry::new(config.pool.clone(), config.breaker.clone()),
            config,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Run `cmd` against `endpoint`, giving up after `overall_timeout`.
    pub async fn execute(
        &self,
        endpoint: &Endpoint,
        password: Option<&str>,
        cmd: &Command,
        policy: &RetryPolicy,
        overall_timeout: Duration,
    ) -> OperationResult {
        let cancel = CancellationToken::new();
        self.execute_until(endpoint, password, cmd, policy, Instant::now() + overall_timeout, &cancel)
            .await
    }

    /// Run `cmd` until it succeeds, fails terminally, runs out of attempts,
    /// passes `deadline`, or `cancel` fires.
    pub async fn execute_until(
        &self,
        endpoint: &Endpoint,
        password: Option<&str>,
        cmd: &Command,
        policy: &RetryPolicy,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> OperationResult {
        let operation_id = Uuid::new_v4();
        let started = Instant::now();
        let span = tracing::info_span!(
            "pjlink_execute",
            %operation_id,
            endpoint = %endpoint,
            operation = cmd.operation(),
        );

        let LoopOutcome { outcome, attempts } = self
            .run(endpoint, password, cmd, policy, started, deadline, cancel)
            .instrument(span.clone())
            .await;
        let total_elapsed = started.elapsed();

        let label = match &outcome {
            Ok(_) => "ok",
            Err(e) => e.kind().as_str(),
        };
        metrics::record_command(cmd.operation(), label, total_elapsed);
        span.in_scope(|| match &outcome {
            Ok(_) => tracing::debug!(attempts, elapsed = ?total_elapsed, "Command succeeded"),
            Err(e) => tracing::warn!(attempts, elapsed = ?total_elapsed, error = %e, "Command failed"),
        });

        OperationResult {
            operation_id,
            outcome,
            attempts_used: attempts,
            total_elapsed,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        endpoint: &Endpoint,
        password: Option<&str>,
        cmd: &Command,
        policy: &RetryPolicy,
        started: Instant,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> LoopOutcome {
        let state = self.registry.get_or_insert(endpoint);
        let overall = deadline.saturating_duration_since(started);

        let mut cmd = if cmd.class() == DeviceClass::Two && state.is_class1_only() {
            cmd.with_class(DeviceClass::One)
        } else {
            cmd.clone()
        };
        // A command that cannot be encoded never reaches the breaker.
        if let Err(e) = protocol::encode(&cmd) {
            return LoopOutcome::done(Err(e), 0);
        }

        let max_attempts = policy.attempts();
        let mut attempts = 0;
        loop {
            if cancel.is_cancelled() {
                return LoopOutcome::done(Err(Error::Cancelled), attempts);
            }
            if Instant::now() >= deadline {
                return LoopOutcome::done(Err(Error::OperationTimeout(overall)), attempts);
            }

            let permit = match state.breaker.allow() {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::debug!(attempts, "Circuit open, not attempting");
                    return LoopOutcome::done(Err(e), attempts);
                }
            };
            attempts += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return LoopOutcome::done(Err(Error::Cancelled), attempts);
                }
                result = self.attempt(&state, password, &cmd, deadline) => result,
                _ = sleep_until(deadline) => {
                    return LoopOutcome::done(Err(Error::OperationTimeout(overall)), attempts);
                }
            };

            let err = match result {
                Ok(response) => {
                    state.breaker.record_success(permit);
                    return LoopOutcome::done(Ok(response), attempts);
                }
                Err(err) => err,
            };

            if let Error::ClassMismatch { requested, actual } = err {
                // The device is alive; it just speaks an older class.
                state.breaker.record_success(permit);
                if requested == DeviceClass::Two && actual == DeviceClass::One {
                    if state.mark_class1_only() {
                        tracing::info!(endpoint = %endpoint, "Device answered at class 1, falling back");
                    }
                    cmd = cmd.with_class(DeviceClass::One);
                    if attempts < max_attempts {
                        continue;
                    }
                }
                return LoopOutcome::done(Err(err), attempts);
            }

            state.breaker.record_failure(permit);
            if !err.is_transient() || attempts >= max_attempts {
                return LoopOutcome::done(Err(err), attempts);
            }

            let delay = policy.delay_before(attempts);
            tracing::info!(
                attempt = attempts,
                max_attempts,
                delay = ?delay,
                error = %err,
                "Transient failure, retrying"
            );
            metrics::record_retry(endpoint);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return LoopOutcome::done(Err(Error::Cancelled), attempts);
                }
                _ = sleep_until(deadline) => {
                    return LoopOutcome::done(Err(Error::OperationTimeout(overall)), attempts);
                }
                _ = sleep(delay) => {}
            }
        }
    }

    /// One round trip. The lease is released on every return path; if this
    /// future is dropped mid-flight the lease retires the connection.
    async fn attempt(
        &self,
        state: &EndpointState,
        password: Option<&str>,
        cmd: &Command,
        deadline: Instant,
    ) -> Result<Response, Error> {
        let mut conn = state.pool.acquire(deadline, password).await?;
        let read_timeout = step_timeout(self.config.read_timeout, deadline);

        match conn.execute(cmd, read_timeout).await {
            Ok(response) => {
                conn.release(true);
                match response.status() {
                    Status::Ok => Ok(response),
                    status => Err(Error::DeviceRejected { status }),
                }
            }
            Err(e) => {
                tracing::debug!(connection_id = %conn.id(), error = %e, "Attempt failed");
                conn.release(!e.poisons_connection());
                Err(e)
            }
        }
    }

    /// Breaker phase for a known endpoint.
    pub fn breaker_phase(&self, endpoint: &Endpoint) -> Option<CircuitPhase> {
        self.registry.get(endpoint).map(|state| state.breaker.phase())
    }

    pub fn breaker_snapshot(&self, endpoint: &Endpoint) -> Option<BreakerSnapshot> {
        self.registry.get(endpoint).map(|state| state.breaker.snapshot())
    }

    pub fn pool_stats(&self, endpoint: &Endpoint) -> Option<PoolStats> {
        self.registry.get(endpoint).map(|state| state.pool.stats())
    }

    /// Endpoints seen so far, sorted.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.registry.endpoints()
    }

    pub fn is_class1_only(&self, endpoint: &Endpoint) -> bool {
        self.registry
            .get(endpoint)
            .map(|state| state.is_class1_only())
            .unwrap_or(false)
    }

    /// Open `min_size` connections ahead of the first command.
    pub async fn warm_up(&self, endpoint: &Endpoint, password: Option<&str>) -> Result<usize, Error> {
        let state = self.registry.get_or_insert(endpoint);
        let opened = state.pool.warm_up(password).await?;
        tracing::info!(endpoint = %endpoint, opened, "Pool warmed up");
        Ok(opened)
    }

    /// Forget an endpoint and close its pool. Returns false if unknown.
    pub fn close_endpoint(&self, endpoint: &Endpoint) -> bool {
        match self.registry.remove(endpoint) {
            Some(state) => {
                state.pool.close();
                true
            }
            None => false,
        }
    }

    /// Close every pool.
    pub fn close_all(&self) {
        for endpoint in self.registry.endpoints() {
            self.close_endpoint(&endpoint);
        }
    }

    /// Run the reaper over every registered pool until `shutdown` fires.
    pub fn spawn_reaper(&self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let reaper = Reaper::new(self.registry.clone(), self.config.reaper_interval);
        tokio::spawn(reaper.run(shutdown))
    }
}
