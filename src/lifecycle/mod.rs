//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build controller → Start reaper
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop background tasks → Close pools → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then background tasks
//! - Ordered shutdown: stop reaper, then close pools

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::ClientRuntime;
