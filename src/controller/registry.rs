//! Per-endpoint resources.
//!
//! Each projector gets its own pool, breaker and class flag, created on
//! first use. Entries never share locks, so work on one endpoint never
//! blocks on another.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::net::Endpoint;
use crate::pool::{ConnectionPool, PoolConfig};
use crate::resilience::{BreakerConfig, CircuitBreaker};

/// Everything the controller keeps for one projector.
#[derive(Debug)]
pub struct EndpointState {
    pub endpoint: Endpoint,
    pub pool: Arc<ConnectionPool>,
    pub breaker: Arc<CircuitBreaker>,
    /// Set once the device answered a Class 2 request at Class 1.
    class1_only: AtomicBool,
}

impl EndpointState {
    fn new(endpoint: Endpoint, pool_config: &PoolConfig, breaker_config: &BreakerConfig) -> Self {
        Self {
            pool: ConnectionPool::new(endpoint.clone(), pool_config.clone()),
            breaker: CircuitBreaker::new(endpoint.clone(), breaker_config.clone()),
            endpoint,
            class1_only: AtomicBool::new(false),
        }
    }

    pub fn is_class1_only(&self) -> bool {
        self.class1_only.load(Ordering::Acquire)
    }

    /// Returns true if this call set the flag.
    pub fn mark_class1_only(&self) -> bool {
        !self.class1_only.swap(true, Ordering::AcqRel)
    }
}

/// Map from endpoint to its resources. Cloning shares the map.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    entries: Arc<DashMap<Endpoint, Arc<EndpointState>>>,
    pool_config: PoolConfig,
    breaker_config: BreakerConfig,
}

impl EndpointRegistry {
    pub fn new(pool_config: PoolConfig, breaker_config: BreakerConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            pool_config,
            breaker_config,
        }
    }

    /// Resources for `endpoint`, created on first use.
    pub fn get_or_insert(&self, endpoint: &Endpoint) -> Arc<EndpointState> {
        if let Some(state) = self.entries.get(endpoint) {
            return state.value().clone();
        }
        self.entries
            .entry(endpoint.clone())
            .or_insert_with(|| {
                tracing::debug!(endpoint = %endpoint, "Registering endpoint");
                Arc::new(EndpointState::new(
                    endpoint.clone(),
                    &self.pool_config,
                    &self.breaker_config,
                ))
            })
            .value()
            .clone()
    }

    pub fn get(&self, endpoint: &Endpoint) -> Option<Arc<EndpointState>> {
        self.entries.get(endpoint).map(|state| state.value().clone())
    }

    pub fn remove(&self, endpoint: &Endpoint) -> Option<Arc<EndpointState>> {
        self.entries.remove(endpoint).map(|(_, state)| state)
    }

    /// Snapshot of every entry; the map is not locked while callers use it.
    pub fn all(&self) -> Vec<Arc<EndpointState>> {
        self.entries.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        endpoints.sort();
        endpoints
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
