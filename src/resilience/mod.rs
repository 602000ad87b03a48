//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Command from the controller:
//!     → circuit_breaker.rs (admit, or fail fast while open)
//!     → timeouts.rs (derive each step's timeout from the operation deadline)
//!     → On transient failure: retries.rs policy + backoff.rs delay, try again
//!     → circuit_breaker.rs (settle the permit with the attempt's outcome)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every network step has a deadline
//! - Each admitted attempt counts toward the breaker, retries included
//! - Jittered backoff prevents synchronized retry storms across clients
//! - Circuit breaker prevents hammering a projector that is down

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::calculate_backoff;
pub use circuit_breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitPhase, Permit};
pub use retries::{OperationReport, OperationResult, RetryPolicy};
