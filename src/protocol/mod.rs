//! PJLink protocol codec.
//!
//! # Data Flow
//! ```text
//! Command (command.rs)
//!     → codec::encode          "%{class}{OP} {PARAM}\r"
//!     → [auth prefix, first request only] (auth.rs)
//!     → socket
//!
//! socket
//!     → codec::parse_greeting  "PJLINK 0\r" | "PJLINK 1 {seed}\r"
//!     → codec::parse_response  "%{class}{OP}={VALUE}\r"
//!     → Response (response.rs)
//! ```
//!
//! # Design Decisions
//! - Pure functions only: no I/O, no state, safe to share across tasks
//! - Operations are a closed enum; `Command::raw` is the vendor escape hatch
//! - Class mismatches are reported, never silently accepted

pub mod auth;
pub mod codec;
pub mod command;
pub mod response;

pub use auth::{compute_auth_prefix, AuthChallenge};
pub use codec::{encode, parse_greeting, parse_request, parse_response, DecodedRequest};
pub use command::{Command, DeviceClass, Operation};
pub use response::{
    AvMuteState, ErrorReport, FaultLevel, LampStatus, PowerState, Response, Status,
};

/// Default PJLink TCP port.
pub const DEFAULT_PORT: u16 = 4352;

/// Line terminator used in both directions.
pub const TERMINATOR: u8 = b'\r';

/// Longest line a device may send, terminator included.
pub const MAX_RESPONSE_LEN: usize = 136;

/// Longest parameter a request may carry.
pub const MAX_PARAMETER_LEN: usize = 128;
