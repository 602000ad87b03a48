//! Per-endpoint connection pool.
//!
//! # Responsibilities
//! - Lend idle connections, open new ones up to `max_size`
//! - Park callers until a connection frees up or their deadline passes
//! - Retire unhealthy, idle-expired and overused connections
//! - Keep `min_size` connections warm when a password is known
//!
//! All bookkeeping sits behind one mutex; waiters park on a `Notify`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use crate::error::Error;
use crate::net::{Connection, ConnectionId, Endpoint};
use crate::observability::metrics;
use crate::pool::pooled::{ConnectionState, PooledConnection, Slot};
use crate::resilience::timeouts::step_timeout;

/// Pool limits and lifecycle settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub idle_timeout: Duration,
    pub max_uses_per_connection: u64,
    pub connect_timeout: Duration,
    pub health_check_timeout: Duration,
    /// Probe idle connections during each reaper sweep.
    pub health_check_idle: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 2,
            idle_timeout: Duration::from_secs(20),
            max_uses_per_connection: 100,
            connect_timeout: Duration::from_secs(3),
            health_check_timeout: Duration::from_secs(1),
            health_check_idle: true,
        }
    }
}

/// Point-in-time counts for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Leased to callers.
    pub active: usize,
    pub idle: usize,
    /// Being connected right now; they count against `max_size`.
    pub opening: usize,
    pub total: usize,
    pub max_size: usize,
}

/// Outcome of one reaper sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub expired: usize,
    pub overused: usize,
    pub unhealthy: usize,
    pub opened: usize,
}

#[derive(Debug, Default)]
struct PoolInner {
    slots: HashMap<ConnectionId, Slot>,
    /// Idle connections, least recently used at the front.
    idle: VecDeque<Connection>,
    opening: usize,
    /// Last password a caller supplied, for proactive connections.
    password: Option<String>,
    closed: bool,
}

impl PoolInner {
    fn committed(&self) -> usize {
        self.slots.len() + self.opening
    }
}

/// Connection pool for a single endpoint.
#[derive(Debug)]
pub struct ConnectionPool {
    endpoint: Endpoint,
    config: PoolConfig,
    inner: Mutex<PoolInner>,
    available: Notify,
}

enum Next {
    Lease(Connection, u64),
    Open,
    Wait,
}

impl ConnectionPool {
    pub fn new(endpoint: Endpoint, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            config,
            inner: Mutex::new(PoolInner::default()),
            available: Notify::new(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().expect("connection pool mutex poisoned")
    }

    /// Lease a connection, opening one if below `max_size`, otherwise
    /// waiting until `deadline`.
    pub async fn acquire(
        self: &Arc<Self>,
        deadline: Instant,
        password: Option<&str>,
    ) -> Result<PooledConnection, Error> {
        let started = Instant::now();
        loop {
            // Register interest before inspecting state so a release between
            // the check and the wait is not lost.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut mismatched = Vec::new();
            let next = {
                let mut inner = self.lock();
                if let Some(password) = password {
                    if inner.password.as_deref() != Some(password) {
                        inner.password = Some(password.to_string());
                    }
                }
                let mut leased = None;
                while let Some(conn) = inner.idle.pop_back() {
                    if !conn.accepts(password) {
                        // Authenticated with other credentials; make room for a fresh one.
                        inner.slots.remove(&conn.id());
                        mismatched.push(conn);
                        continue;
                    }
                    let slot = match inner.slots.get_mut(&conn.id()) {
                        Some(slot) => slot,
                        None => panic!("idle connection {} has no slot", conn.id()),
                    };
                    assert_eq!(slot.state, ConnectionState::Idle, "idle list out of sync");
                    slot.state = ConnectionState::Leased;
                    slot.use_count += 1;
                    slot.last_used_at = Instant::now();
                    leased = Some(Next::Lease(conn, slot.use_count));
                    break;
                }
                match leased {
                    Some(next) => next,
                    None if inner.closed => {
                        return Err(Error::PoolExhausted {
                            endpoint: self.endpoint.clone(),
                            waited: started.elapsed(),
                        });
                    }
                    None if inner.committed() < self.config.max_size => {
                        inner.opening += 1;
                        Next::Open
                    }
                    None => Next::Wait,
                }
            };
            if !mismatched.is_empty() {
                tracing::debug!(
                    endpoint = %self.endpoint,
                    retired = mismatched.len(),
                    "Retiring idle connections authenticated with other credentials"
                );
                drop(mismatched);
                self.available.notify_one();
            }

            match next {
                Next::Lease(conn, use_count) => {
                    tracing::trace!(connection_id = %conn.id(), use_count, "Reusing idle connection");
                    self.publish_stats();
                    return Ok(PooledConnection::new(self.clone(), conn, use_count));
                }
                Next::Open => {
                    let reservation = Reservation::new(self);
                    let conn = self.connect(deadline, password).await?;
                    let conn = reservation.commit_leased(conn);
                    self.publish_stats();
                    return Ok(PooledConnection::new(self.clone(), conn, 1));
                }
                Next::Wait => {
                    if timeout_at(deadline, notified).await.is_err() {
                        let waited = started.elapsed();
                        tracing::debug!(endpoint = %self.endpoint, ?waited, "Pool exhausted");
                        return Err(Error::PoolExhausted {
                            endpoint: self.endpoint.clone(),
                            waited,
                        });
                    }
                }
            }
        }
    }

    /// Open and authenticate a connection. The caller holds the reservation.
    async fn connect(&self, deadline: Instant, password: Option<&str>) -> Result<Connection, Error> {
        let connect_timeout = step_timeout(self.config.connect_timeout, deadline);

        let mut conn = Connection::open(&self.endpoint, connect_timeout).await?;
        conn.authenticate(password)?;
        Ok(conn)
    }

    /// Return a leased connection.
    pub fn release(&self, conn: PooledConnection, healthy: bool) {
        assert!(
            std::ptr::eq(Arc::as_ptr(conn.pool()), self),
            "connection released to a pool it does not belong to"
        );
        conn.release(healthy);
    }

    /// `touched` is false for health checks, which leave the idle clock alone.
    pub(crate) fn give_back(&self, conn: Connection, healthy: bool, touched: bool) {
        let id = conn.id();
        let retired = {
            let mut inner = self.lock();
            let closed = inner.closed;
            let slot = match inner.slots.get_mut(&id) {
                Some(slot) => slot,
                None => panic!("connection {id} released to pool for {} but not owned by it", self.endpoint),
            };
            assert_eq!(
                slot.state,
                ConnectionState::Leased,
                "connection {id} released while not leased"
            );

            let overused = slot.use_count >= self.config.max_uses_per_connection;
            if healthy && !overused && !closed && conn.is_open() {
                slot.state = ConnectionState::Idle;
                if touched {
                    slot.last_used_at = Instant::now();
                }
                inner.idle.push_back(conn);
                None
            } else {
                slot.state = ConnectionState::Unhealthy;
                tracing::debug!(
                    connection_id = %id,
                    endpoint = %self.endpoint,
                    healthy,
                    overused,
                    age = ?slot.created_at.elapsed(),
                    "Retiring connection"
                );
                inner.slots.remove(&id);
                Some(conn)
            }
        };
        // Dropping the connection closes the socket.
        drop(retired);
        self.available.notify_one();
        self.publish_stats();
    }

    /// Current counts.
    pub fn stats(&self) -> PoolStats {
        let inner = self.lock();
        let idle = inner.idle.len();
        let active = inner
            .slots
            .values()
            .filter(|slot| slot.state == ConnectionState::Leased)
            .count();
        PoolStats {
            active,
            idle,
            opening: inner.opening,
            total: inner.slots.len(),
            max_size: self.config.max_size,
        }
    }

    /// Proactively open connections up to `min_size`.
    pub async fn warm_up(self: &Arc<Self>, password: Option<&str>) -> Result<usize, Error> {
        if let Some(password) = password {
            self.lock().password = Some(password.to_string());
        }
        self.replenish().await
    }

    async fn replenish(self: &Arc<Self>) -> Result<usize, Error> {
        let mut opened = 0;
        loop {
            let password = {
                let mut inner = self.lock();
                if inner.closed || inner.committed() >= self.config.min_size.min(self.config.max_size) {
                    break;
                }
                inner.opening += 1;
                inner.password.clone()
            };
            let reservation = Reservation::new(self);
            let deadline = Instant::now() + self.config.connect_timeout;
            let conn = self.connect(deadline, password.as_deref()).await?;
            reservation.commit_idle(conn);
            self.available.notify_one();
            opened += 1;
        }
        if opened > 0 {
            tracing::debug!(endpoint = %self.endpoint, opened, "Pool replenished");
            self.publish_stats();
        }
        Ok(opened)
    }

    /// One reaper sweep: drop expired and overused idle connections, probe the
    /// rest if configured, then top back up to `min_size`.
    pub async fn reap(self: &Arc<Self>) -> ReapReport {
        let mut report = ReapReport::default();
        let now = Instant::now();

        let (retired, to_probe) = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let mut total = inner.slots.len();
            let mut keep = VecDeque::with_capacity(inner.idle.len());
            let mut retired = Vec::new();

            for conn in inner.idle.drain(..) {
                let id = conn.id();
                let Some(slot) = inner.slots.get(&id) else {
                    panic!("idle connection {id} has no slot");
                };
                let overused = slot.use_count >= self.config.max_uses_per_connection;
                let expired = now.saturating_duration_since(slot.last_used_at) > self.config.idle_timeout
                    && total > self.config.min_size;
                if overused || expired {
                    if overused {
                        report.overused += 1;
                    } else {
                        report.expired += 1;
                    }
                    inner.slots.remove(&id);
                    total -= 1;
                    retired.push(conn);
                } else {
                    keep.push_back(conn);
                }
            }

            // Each probed connection is leased under the lock, so a sweep
            // dropped mid-probe hands every one of them back.
            let to_probe: Vec<PooledConnection> = if self.config.health_check_idle {
                keep.drain(..)
                    .map(|conn| {
                        let use_count = match inner.slots.get_mut(&conn.id()) {
                            Some(slot) => {
                                slot.state = ConnectionState::Leased;
                                slot.use_count
                            }
                            None => panic!("idle connection {} has no slot", conn.id()),
                        };
                        PooledConnection::for_health_check(self.clone(), conn, use_count)
                    })
                    .collect()
            } else {
                Vec::new()
            };
            inner.idle = keep;
            (retired, to_probe)
        };

        if !retired.is_empty() {
            drop(retired);
            self.available.notify_waiters();
        }

        for mut lease in to_probe {
            let healthy = lease.health_check(self.config.health_check_timeout).await;
            if !healthy {
                report.unhealthy += 1;
            }
            lease.release(healthy);
        }

        match self.replenish().await {
            Ok(opened) => report.opened = opened,
            Err(e) => {
                tracing::debug!(endpoint = %self.endpoint, error = %e, "Could not replenish pool");
            }
        }

        self.publish_stats();
        report
    }

    /// Close every idle connection and refuse new leases. Outstanding leases
    /// are closed when they come back.
    pub fn close(&self) {
        let idle: Vec<Connection> = {
            let mut inner = self.lock();
            inner.closed = true;
            let idle: Vec<Connection> = inner.idle.drain(..).collect();
            for conn in &idle {
                inner.slots.remove(&conn.id());
            }
            idle
        };
        tracing::debug!(endpoint = %self.endpoint, closed = idle.len(), "Pool closed");
        drop(idle);
        self.available.notify_waiters();
        self.publish_stats();
    }

    fn publish_stats(&self) {
        metrics::record_pool_stats(&self.endpoint, &self.stats());
    }
}

/// An `opening` reservation; gives the capacity back unless committed.
///
/// Committing swaps the reservation for a slot under one lock, so
/// `slots + opening` never dips while a connection changes hands.
struct Reservation<'a> {
    pool: &'a ConnectionPool,
    armed: bool,
}

impl<'a> Reservation<'a> {
    fn new(pool: &'a ConnectionPool) -> Self {
        Self { pool, armed: true }
    }

    fn commit_leased(mut self, conn: Connection) -> Connection {
        self.armed = false;
        let mut inner = self.pool.lock();
        inner.opening -= 1;
        let mut slot = Slot::new(ConnectionState::Leased, Instant::now());
        slot.use_count = 1;
        inner.slots.insert(conn.id(), slot);
        conn
    }

    fn commit_idle(mut self, conn: Connection) {
        self.armed = false;
        {
            let mut inner = self.pool.lock();
            inner.opening -= 1;
            inner
                .slots
                .insert(conn.id(), Slot::new(ConnectionState::Idle, Instant::now()));
            inner.idle.push_back(conn);
        }
        self.pool.available.notify_one();
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.lock().opening -= 1;
            self.pool.available.notify_one();
        }
    }
}
