//! Deadline helpers.
//!
//! # Design Decisions
//! - One absolute deadline per operation; every step derives its own
//!   timeout from what is left of it
//! - Tokio's clock, so paused-time tests drive every timeout

use std::time::Duration;

use tokio::time::Instant;

/// Time left until `deadline`, zero once it has passed.
pub fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// The smaller of a configured step timeout and what is left of `deadline`.
pub fn step_timeout(configured: Duration, deadline: Instant) -> Duration {
    configured.min(remaining(deadline))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn step_timeout_shrinks_with_deadline() {
        let deadline = Instant::now() + Duration::from_secs(2);
        assert_eq!(step_timeout(Duration::from_secs(5), deadline), Duration::from_secs(2));

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(step_timeout(Duration::from_secs(5), deadline), Duration::from_millis(500));
        assert_eq!(step_timeout(Duration::from_millis(100), deadline), Duration::from_millis(100));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(remaining(deadline), Duration::ZERO);
    }
}
