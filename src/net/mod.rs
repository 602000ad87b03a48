//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Endpoint (endpoint.rs)
//!     → Connection::open (TCP connect + greeting, one deadline)
//!     → Connection::authenticate (digest stored, not yet sent)
//!     → Connection::execute (prefix on first request, read until '\r')
//!     → Connection::close
//! ```
//!
//! # Design Decisions
//! - One command in flight per connection; the pool provides concurrency
//! - Every socket operation has a deadline
//! - Lines are bounded to the protocol maximum

pub mod connection;
pub mod endpoint;

pub use connection::{Connection, ConnectionId};
pub use endpoint::Endpoint;
