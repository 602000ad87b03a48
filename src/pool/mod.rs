//! Connection pooling subsystem.
//!
//! # Data Flow
//! ```text
//! Controller attempt
//!     → pool.rs acquire (idle → lease | below max → open | else wait)
//!     → pooled.rs PooledConnection (RAII lease)
//!     → release(healthy) | drop → retired as unhealthy
//!
//! reaper.rs (periodic, off the request path)
//!     → pool.rs reap (expire, retire overused, probe idle, replenish)
//! ```
//!
//! # Design Decisions
//! - One pool per endpoint, one mutex per pool
//! - Connections being opened count against `max_size`
//! - A connection is owned by the pool; callers only hold a lease

#[allow(clippy::module_inception)]
pub mod pool;
pub mod pooled;
pub mod reaper;

pub use pool::{ConnectionPool, PoolConfig, PoolStats, ReapReport};
pub use pooled::{ConnectionState, PooledConnection};
pub use reaper::Reaper;
