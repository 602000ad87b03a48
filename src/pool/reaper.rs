//! Background pool maintenance.
//!
//! # Responsibilities
//! - Periodically sweep every registered pool
//! - Retire idle-expired and overused connections, probe the rest
//! - Top pools back up to their minimum size

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::controller::registry::EndpointRegistry;
use crate::pool::ReapReport;

pub struct Reaper {
    registry: EndpointRegistry,
    interval: Duration,
}

impl Reaper {
    pub fn new(registry: EndpointRegistry, interval: Duration) -> Self {
        Self { registry, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval = ?self.interval, "Pool reaper starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing is idle yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Pool reaper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Sweep each pool in turn. Each sweep only takes its own pool's lock.
    pub async fn sweep_all(&self) {
        for state in self.registry.all() {
            let report = state.pool.reap().await;
            if report != ReapReport::default() {
                tracing::debug!(
                    endpoint = %state.endpoint,
                    expired = report.expired,
                    overused = report.overused,
                    unhealthy = report.unhealthy,
                    opened = report.opened,
                    "Reaper sweep"
                );
            }
        }
    }
}
