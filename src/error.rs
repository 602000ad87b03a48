//! Error taxonomy for the PJLink client.
//!
//! Every fallible operation in the crate returns `Result<T, Error>`. The
//! controller classifies each error exactly once through
//! [`Error::is_transient`]; callers that only need a stable discriminant
//! (status displays, logs) use [`Error::kind`].

use std::io;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::net::Endpoint;
use crate::protocol::{DeviceClass, Status};

/// The canonical error type for the client.
#[derive(Debug, Error)]
pub enum Error {
    // ── Codec ────────────────────────────────────────────────────
    /// A command could not be turned into wire bytes.
    #[error("cannot encode command: {0}")]
    Encoding(String),

    /// Bytes received from the device did not follow the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The device answered with a different class than the request used.
    #[error("class mismatch: requested class {requested}, device answered class {actual}")]
    ClassMismatch {
        requested: DeviceClass,
        actual: DeviceClass,
    },

    // ── Connection ───────────────────────────────────────────────
    /// TCP connect was refused or the host is unreachable.
    #[error("cannot connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    /// TCP connect or the greeting did not complete in time.
    #[error("connecting to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: Endpoint, timeout: Duration },

    /// Writing the request failed.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    /// The device did not answer within the read timeout.
    #[error("no response within {0:?}")]
    ReadTimeout(Duration),

    /// The device closed or reset the connection.
    #[error("connection reset by device")]
    ConnectionReset,

    // ── Authentication ───────────────────────────────────────────
    /// The device demands a password and none was supplied.
    #[error("device requires a password but none was supplied")]
    AuthenticationRequired,

    /// The device rejected the password (ERRA).
    #[error("authentication failed, check the projector password")]
    Authentication,

    // ── Device ───────────────────────────────────────────────────
    /// The device answered ERR1..ERR4.
    #[error("device rejected the command: {status}")]
    DeviceRejected { status: Status },

    // ── Resilience ───────────────────────────────────────────────
    /// No pooled connection became available before the deadline.
    #[error("no connection to {endpoint} available after {waited:?}")]
    PoolExhausted { endpoint: Endpoint, waited: Duration },

    /// The endpoint's circuit breaker is rejecting calls.
    #[error("circuit open for {endpoint}")]
    CircuitOpen { endpoint: Endpoint },

    /// The overall operation deadline passed.
    #[error("operation timed out after {0:?}")]
    OperationTimeout(Duration),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

/// Stable, payload-free discriminant of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Encoding,
    Protocol,
    ClassMismatch,
    Connect,
    ConnectTimeout,
    Write,
    ReadTimeout,
    ConnectionReset,
    AuthenticationRequired,
    Authentication,
    DeviceRejected,
    PoolExhausted,
    CircuitOpen,
    OperationTimeout,
    Cancelled,
}

impl ErrorKind {
    /// Snake-case name, as serialized.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Encoding => "encoding",
            ErrorKind::Protocol => "protocol",
            ErrorKind::ClassMismatch => "class_mismatch",
            ErrorKind::Connect => "connect",
            ErrorKind::ConnectTimeout => "connect_timeout",
            ErrorKind::Write => "write",
            ErrorKind::ReadTimeout => "read_timeout",
            ErrorKind::ConnectionReset => "connection_reset",
            ErrorKind::AuthenticationRequired => "authentication_required",
            ErrorKind::Authentication => "authentication",
            ErrorKind::DeviceRejected => "device_rejected",
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::OperationTimeout => "operation_timeout",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl Error {
    /// Payload-free kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Encoding(_) => ErrorKind::Encoding,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::ClassMismatch { .. } => ErrorKind::ClassMismatch,
            Error::Connect { .. } => ErrorKind::Connect,
            Error::ConnectTimeout { .. } => ErrorKind::ConnectTimeout,
            Error::Write(_) => ErrorKind::Write,
            Error::ReadTimeout(_) => ErrorKind::ReadTimeout,
            Error::ConnectionReset => ErrorKind::ConnectionReset,
            Error::AuthenticationRequired => ErrorKind::AuthenticationRequired,
            Error::Authentication => ErrorKind::Authentication,
            Error::DeviceRejected { .. } => ErrorKind::DeviceRejected,
            Error::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Error::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Error::OperationTimeout(_) => ErrorKind::OperationTimeout,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether a retry of the same command may succeed.
    ///
    /// A busy device (ERR3) is transient; every other device rejection is
    /// final. `ClassMismatch` is not transient: the controller handles it
    /// through the class fallback instead of the backoff path.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Connect { .. }
            | Error::ConnectTimeout { .. }
            | Error::Write(_)
            | Error::ReadTimeout(_)
            | Error::ConnectionReset
            | Error::Protocol(_)
            | Error::PoolExhausted { .. } => true,
            Error::DeviceRejected { status } => *status == Status::Unavailable,
            Error::Encoding(_)
            | Error::ClassMismatch { .. }
            | Error::AuthenticationRequired
            | Error::Authentication
            | Error::CircuitOpen { .. }
            | Error::OperationTimeout(_)
            | Error::Cancelled => false,
        }
    }

    /// Whether the connection that produced this error must be retired.
    ///
    /// After an I/O failure or a garbled line the stream position is unknown;
    /// after ERRA the device drops the session. Everything else leaves the
    /// socket usable.
    pub fn poisons_connection(&self) -> bool {
        !matches!(
            self,
            Error::Encoding(_) | Error::ClassMismatch { .. } | Error::DeviceRejected { .. }
        )
    }

    /// Map an I/O error seen while reading a line.
    pub(crate) fn from_read_io(err: io::Error) -> Self {
        tracing::trace!(error = %err, kind = ?err.kind(), "read failed");
        Error::ConnectionReset
    }
}
