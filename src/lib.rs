//! Resilient PJLink projector client library.
//!
//! Commands go through [`ResilientController::execute`], which pools TCP
//! connections per projector, retries transient failures with jittered
//! backoff, stops calling projectors that keep failing, and falls back from
//! Class 2 to Class 1 for older devices.

pub mod config;
pub mod controller;
pub mod error;
pub mod net;
pub mod pool;
pub mod protocol;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ClientConfig;
pub use controller::{ControllerConfig, ResilientController};
pub use error::{Error, ErrorKind};
pub use lifecycle::Shutdown;
pub use net::Endpoint;
pub use protocol::{Command, DeviceClass, Operation, Response, Status};
pub use resilience::{CircuitPhase, OperationResult, RetryPolicy};
