//! Leased connections.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;

use crate::net::{Connection, ConnectionId};
use crate::pool::ConnectionPool;

/// Lifecycle state of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Leased,
    Unhealthy,
}

/// Bookkeeping the pool keeps for every connection it owns.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub state: ConnectionState,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub use_count: u64,
}

impl Slot {
    pub fn new(state: ConnectionState, now: Instant) -> Self {
        Self {
            state,
            created_at: now,
            last_used_at: now,
            use_count: 0,
        }
    }
}

/// A RAII lease on a pooled connection.
///
/// Return it with [`PooledConnection::release`]. Dropping a lease without
/// releasing it (cancellation, panic) hands the connection back as
/// unhealthy, so the pool never loses track of a slot.
#[derive(Debug)]
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    conn: Option<Connection>,
    use_count: u64,
    /// False for reaper health checks, which must not refresh idle time.
    counts_as_use: bool,
}

impl PooledConnection {
    pub(crate) fn new(pool: Arc<ConnectionPool>, conn: Connection, use_count: u64) -> Self {
        Self {
            pool,
            conn: Some(conn),
            use_count,
            counts_as_use: true,
        }
    }

    /// A lease the reaper takes to probe an idle connection.
    pub(crate) fn for_health_check(pool: Arc<ConnectionPool>, conn: Connection, use_count: u64) -> Self {
        let mut lease = Self::new(pool, conn, use_count);
        lease.counts_as_use = false;
        lease
    }

    pub fn id(&self) -> ConnectionId {
        self.deref().id()
    }

    pub(crate) fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// How many times this connection has been leased, this lease included.
    pub fn use_count(&self) -> u64 {
        self.use_count
    }

    /// Hand the connection back. Unhealthy connections are closed and removed.
    pub fn release(mut self, healthy: bool) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn, healthy, self.counts_as_use);
        }
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("lease used after release"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("lease used after release"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::debug!(
                connection_id = %conn.id(),
                endpoint = %conn.endpoint(),
                "Lease dropped without release, retiring connection"
            );
            self.pool.give_back(conn, false, self.counts_as_use);
        }
    }
}
