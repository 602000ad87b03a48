//! Circuit breaker for projector protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: projector assumed down, requests fail fast
//! - Half-Open: testing if projector recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: first admission check after open_duration
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails (fresh opened_at)
//! ```
//!
//! # Design Decisions
//! - Per-endpoint circuit breaker (not global)
//! - Fail fast in Open state (no network call)
//! - Single probe in Half-Open (prevents hammering recovering projector)
//! - One mutex per breaker; every operation is O(1)
//! - Outcomes arrive through a `Permit` stamped with the breaker's
//!   generation; reports from before the last transition are ignored

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::Error;
use crate::net::Endpoint;
use crate::observability::metrics;

/// Breaker phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    phase: CircuitPhase,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    /// Bumped on every phase change.
    generation: u64,
}

/// Diagnostic copy of the breaker state.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub phase: CircuitPhase,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub open_duration_ms: u64,
    /// Time until an Open breaker admits a probe.
    pub retry_in_ms: Option<u64>,
}

/// Circuit breaker for a single endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    endpoint: Endpoint,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(endpoint: Endpoint, config: BreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            config,
            state: Mutex::new(BreakerState {
                phase: CircuitPhase::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
                generation: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().expect("circuit breaker mutex poisoned")
    }

    /// Admission check.
    pub fn allow(self: &Arc<Self>) -> Result<Permit, Error> {
        let mut state = self.lock();
        match state.phase {
            CircuitPhase::Closed => Ok(Permit::new(self.clone(), false, state.generation)),
            CircuitPhase::Open => {
                let elapsed = state
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.open_duration {
                    state.phase = CircuitPhase::HalfOpen;
                    state.probe_in_flight = true;
                    state.generation += 1;
                    let generation = state.generation;
                    drop(state);
                    self.transitioned(CircuitPhase::HalfOpen);
                    Ok(Permit::new(self.clone(), true, generation))
                } else {
                    Err(self.rejection())
                }
            }
            CircuitPhase::HalfOpen => {
                if state.probe_in_flight {
                    Err(self.rejection())
                } else {
                    state.probe_in_flight = true;
                    Ok(Permit::new(self.clone(), true, state.generation))
                }
            }
        }
    }

    /// Report that the admitted operation succeeded.
    pub fn record_success(&self, mut permit: Permit) {
        self.settle(&mut permit, true);
    }

    /// Report that the admitted operation failed.
    pub fn record_failure(&self, mut permit: Permit) {
        self.settle(&mut permit, false);
    }

    fn settle(&self, permit: &mut Permit, success: bool) {
        assert!(
            std::ptr::eq(Arc::as_ptr(&permit.breaker), self),
            "permit settled on a breaker that did not issue it"
        );
        permit.settled = true;

        let mut state = self.lock();
        if permit.generation != state.generation {
            // Admitted before the last transition.
            return;
        }
        let transition = match (state.phase, permit.probe, success) {
            (CircuitPhase::Closed, _, true) => {
                state.consecutive_failures = 0;
                None
            }
            (CircuitPhase::Closed, _, false) => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.phase = CircuitPhase::Open;
                    state.opened_at = Some(Instant::now());
                    Some(CircuitPhase::Open)
                } else {
                    None
                }
            }
            (CircuitPhase::HalfOpen, true, true) => {
                state.phase = CircuitPhase::Closed;
                state.consecutive_failures = 0;
                state.opened_at = None;
                state.probe_in_flight = false;
                Some(CircuitPhase::Closed)
            }
            (CircuitPhase::HalfOpen, true, false) => {
                state.phase = CircuitPhase::Open;
                state.opened_at = Some(Instant::now());
                state.probe_in_flight = false;
                Some(CircuitPhase::Open)
            }
            (CircuitPhase::HalfOpen, false, _) | (CircuitPhase::Open, _, _) => None,
        };
        if transition.is_some() {
            state.generation += 1;
        }
        let failures = state.consecutive_failures;
        drop(state);

        if let Some(phase) = transition {
            if phase == CircuitPhase::Open {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    consecutive_failures = failures,
                    open_for = ?self.config.open_duration,
                    "Circuit opened"
                );
            }
            self.transitioned(phase);
        }
    }

    /// Current phase. An Open breaker whose duration has passed still reads
    /// Open until the next admission check moves it.
    pub fn phase(&self) -> CircuitPhase {
        self.lock().phase
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.lock();
        let retry_in_ms = match (state.phase, state.opened_at) {
            (CircuitPhase::Open, Some(at)) => Some(
                self.config
                    .open_duration
                    .saturating_sub(at.elapsed())
                    .as_millis() as u64,
            ),
            _ => None,
        };
        BreakerSnapshot {
            phase: state.phase,
            consecutive_failures: state.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            open_duration_ms: self.config.open_duration.as_millis() as u64,
            retry_in_ms,
        }
    }

    fn rejection(&self) -> Error {
        Error::CircuitOpen {
            endpoint: self.endpoint.clone(),
        }
    }

    fn transitioned(&self, phase: CircuitPhase) {
        if phase != CircuitPhase::Open {
            tracing::info!(endpoint = %self.endpoint, phase = ?phase, "Circuit state changed");
        }
        metrics::record_circuit_state(&self.endpoint, phase);
    }
}

/// Admission ticket for one attempt.
///
/// Settle it with [`CircuitBreaker::record_success`] or
/// [`CircuitBreaker::record_failure`]. A permit dropped unsettled (the
/// attempt was cancelled) counts as a failure, which also frees the
/// half-open probe slot.
#[derive(Debug)]
pub struct Permit {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    generation: u64,
    settled: bool,
}

impl Permit {
    fn new(breaker: Arc<CircuitBreaker>, probe: bool, generation: u64) -> Self {
        Self {
            breaker,
            probe,
            generation,
            settled: false,
        }
    }

    /// True for the single half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(endpoint = %self.breaker.endpoint, probe = self.probe, "Permit abandoned");
            let breaker = self.breaker.clone();
            breaker.settle(self, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, open_ms: u64) -> Arc<CircuitBreaker> {
        CircuitBreaker::new(
            Endpoint::new("127.0.0.1", 4352),
            BreakerConfig {
                failure_threshold: threshold,
                open_duration: Duration::from_millis(open_ms),
            },
        )
    }

    fn fail(b: &Arc<CircuitBreaker>) {
        let permit = b.allow().unwrap();
        b.record_failure(permit);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold() {
        let b = breaker(3, 1000);
        fail(&b);
        fail(&b);
        assert_eq!(b.phase(), CircuitPhase::Closed);
        fail(&b);
        assert_eq!(b.phase(), CircuitPhase::Open);
        assert!(matches!(b.allow(), Err(Error::CircuitOpen { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failures() {
        let b = breaker(3, 1000);
        fail(&b);
        fail(&b);
        let permit = b.allow().unwrap();
        b.record_success(permit);
        assert_eq!(b.snapshot().consecutive_failures, 0);
        fail(&b);
        fail(&b);
        assert_eq!(b.phase(), CircuitPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn single_probe_after_open_duration() {
        let b = breaker(1, 1000);
        fail(&b);
        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(b.allow().is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        let probe = b.allow().unwrap();
        assert!(probe.is_probe());
        assert_eq!(b.phase(), CircuitPhase::HalfOpen);
        assert!(matches!(b.allow(), Err(Error::CircuitOpen { .. })));
        assert!(matches!(b.allow(), Err(Error::CircuitOpen { .. })));

        b.record_success(probe);
        assert_eq!(b.phase(), CircuitPhase::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 0);
        assert!(b.allow().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens_with_fresh_timer() {
        let b = breaker(1, 1000);
        fail(&b);
        tokio::time::advance(Duration::from_secs(2)).await;
        let probe = b.allow().unwrap();
        b.record_failure(probe);
        assert_eq!(b.phase(), CircuitPhase::Open);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(b.allow().is_err());
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(b.allow().unwrap().is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_probe_counts_as_failure() {
        let b = breaker(1, 1000);
        fail(&b);
        tokio::time::advance(Duration::from_secs(1)).await;
        drop(b.allow().unwrap());
        assert_eq!(b.phase(), CircuitPhase::Open);
        assert!(b.snapshot().retry_in_ms.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_outcomes_are_ignored() {
        let b = breaker(2, 1000);
        let early = b.allow().unwrap();
        fail(&b);
        fail(&b);
        assert_eq!(b.phase(), CircuitPhase::Open);
        // Admitted while closed, reported after the breaker opened.
        b.record_success(early);
        assert_eq!(b.phase(), CircuitPhase::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn outcome_from_before_a_full_cycle_is_ignored() {
        let b = breaker(2, 1000);
        let early = b.allow().unwrap();
        fail(&b);
        fail(&b);
        tokio::time::advance(Duration::from_secs(1)).await;
        let probe = b.allow().unwrap();
        b.record_success(probe);
        assert_eq!(b.phase(), CircuitPhase::Closed);

        // Admitted in the previous closed period.
        b.record_failure(early);
        assert_eq!(b.snapshot().consecutive_failures, 0);
        fail(&b);
        assert_eq!(b.phase(), CircuitPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_one_of_many() {
        let b = breaker(1, 100);
        fail(&b);
        tokio::time::advance(Duration::from_millis(100)).await;

        let permits: Vec<Permit> = (0..16).filter_map(|_| b.allow().ok()).collect();
        assert_eq!(permits.len(), 1);
        assert!(permits[0].is_probe());
    }
}
