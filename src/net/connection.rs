//! A single PJLink session over TCP.
//!
//! # Responsibilities
//! - Connect with a deadline and read the greeting
//! - Hold the authentication prefix until the first request
//! - Round-trip one command at a time with read/write timeouts
//! - Cheap health probe for the pool

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::Error;
use crate::net::Endpoint;
use crate::protocol::{
    codec, compute_auth_prefix, AuthChallenge, Command, Operation, Response, Status,
    MAX_RESPONSE_LEN, TERMINATOR,
};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An open session with one projector.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    endpoint: Endpoint,
    stream: Option<BufReader<TcpStream>>,
    challenge: AuthChallenge,
    authenticated: bool,
    /// Sent in front of the next request, then cleared.
    auth_prefix: Option<String>,
    /// Digest this session authenticated with; kept to match later callers.
    digest: Option<String>,
    commands_sent: u64,
}

impl Connection {
    /// Connect and read the greeting; both must finish within `connect_timeout`.
    pub async fn open(endpoint: &Endpoint, connect_timeout: Duration) -> Result<Self, Error> {
        let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
        let stream = match timeout(connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(Error::Connect {
                    endpoint: endpoint.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(Error::ConnectTimeout {
                    endpoint: endpoint.clone(),
                    timeout: connect_timeout,
                })
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::trace!(endpoint = %endpoint, error = %e, "set_nodelay failed");
        }

        let mut stream = BufReader::new(stream);
        let greeting = match timeout(connect_timeout, read_line(&mut stream)).await {
            Ok(line) => line?,
            Err(_) => {
                return Err(Error::ConnectTimeout {
                    endpoint: endpoint.clone(),
                    timeout: connect_timeout,
                })
            }
        };
        let challenge = codec::parse_greeting(&greeting)?;

        let id = ConnectionId::new();
        tracing::debug!(
            connection_id = %id,
            endpoint = %endpoint,
            auth = challenge.requires_auth(),
            "Connection opened"
        );

        Ok(Self {
            id,
            endpoint: endpoint.clone(),
            stream: Some(stream),
            authenticated: !challenge.requires_auth(),
            challenge,
            auth_prefix: None,
            digest: None,
            commands_sent: 0,
        })
    }

    /// Prepare the digest for an authenticated greeting. Idempotent.
    pub fn authenticate(&mut self, password: Option<&str>) -> Result<(), Error> {
        if self.authenticated {
            return Ok(());
        }
        if let AuthChallenge::Required { seed } = &self.challenge {
            let prefix = compute_auth_prefix(seed, password.unwrap_or_default())?;
            self.digest = Some(prefix.clone());
            self.auth_prefix = Some(prefix);
        }
        self.authenticated = true;
        Ok(())
    }

    /// Send one command and wait for its response line.
    ///
    /// ERRA, either as a response value or as a `PJLINK ERRA` line, fails with
    /// [`Error::Authentication`]. Other error statuses are returned in the
    /// [`Response`] for the caller to judge.
    pub async fn execute(&mut self, cmd: &Command, read_timeout: Duration) -> Result<Response, Error> {
        let frame = codec::encode(cmd)?;
        if !self.authenticated {
            return Err(Error::AuthenticationRequired);
        }
        let stream = self.stream.as_mut().ok_or(Error::ConnectionReset)?;

        let mut request = Vec::with_capacity(frame.len() + 32);
        if let Some(prefix) = self.auth_prefix.take() {
            request.extend_from_slice(prefix.as_bytes());
        }
        request.extend_from_slice(&frame);

        let write = async {
            stream.write_all(&request).await?;
            stream.flush().await
        };
        match timeout(read_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Error::Write(e)),
            Err(_) => {
                return Err(Error::Write(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "write timed out",
                )))
            }
        }
        self.commands_sent += 1;

        let line = timeout(read_timeout, read_line(stream))
            .await
            .map_err(|_| Error::ReadTimeout(read_timeout))??;
        let response = codec::parse_response(&line, cmd)?;

        tracing::trace!(
            connection_id = %self.id,
            request = %cmd,
            status = response.status().code(),
            payload = response.payload(),
            "Command completed"
        );

        if response.status() == Status::AuthError {
            return Err(Error::Authentication);
        }
        Ok(response)
    }

    /// Class query with a short timeout; never fails, only reports.
    pub async fn health_check(&mut self, probe_timeout: Duration) -> bool {
        match self.execute(&Command::query(Operation::Class), probe_timeout).await {
            Ok(response) if response.is_ok() => true,
            Ok(response) => {
                tracing::debug!(connection_id = %self.id, status = %response.status(), "Health check rejected");
                false
            }
            Err(e) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Health check failed");
                false
            }
        }
    }

    /// Shut the socket down. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.get_mut().shutdown().await {
                tracing::trace!(connection_id = %self.id, error = %e, "Shutdown failed");
            }
            tracing::debug!(connection_id = %self.id, endpoint = %self.endpoint, "Connection closed");
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn requires_auth(&self) -> bool {
        self.challenge.requires_auth()
    }

    /// Whether a caller holding `password` may use this session. Sessions
    /// without authentication accept anyone.
    pub fn accepts(&self, password: Option<&str>) -> bool {
        let AuthChallenge::Required { seed } = &self.challenge else {
            return true;
        };
        match compute_auth_prefix(seed, password.unwrap_or_default()) {
            Ok(prefix) => self.digest.as_deref() == Some(prefix.as_str()),
            Err(_) => false,
        }
    }

    pub fn commands_sent(&self) -> u64 {
        self.commands_sent
    }
}

/// Read up to and including `\r`, bounded by the protocol's line limit.
async fn read_line<R>(reader: &mut R) -> Result<Vec<u8>, Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(64);
    let read = (&mut *reader)
        .take(MAX_RESPONSE_LEN as u64 + 1)
        .read_until(TERMINATOR, &mut line)
        .await
        .map_err(Error::from_read_io)?;
    if read == 0 {
        return Err(Error::ConnectionReset);
    }
    if line.last() != Some(&TERMINATOR) {
        if line.len() > MAX_RESPONSE_LEN {
            return Err(Error::Protocol(format!(
                "line exceeds {MAX_RESPONSE_LEN} bytes"
            )));
        }
        return Err(Error::ConnectionReset);
    }
    Ok(line)
}
