//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

use crate::resilience::retries::RetryPolicy;

/// Calculate the delay before `attempt` (attempt 0 is the first try and
/// never waits).
///
/// `base * multiplier^(attempt - 1)`, capped at `max_delay`, then moved by a
/// uniform ±`jitter_fraction` of itself. The result never exceeds `max_delay`.
pub fn calculate_backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let base_ms = policy.base_delay.as_secs_f64() * 1000.0;
    let max_ms = policy.max_delay.as_secs_f64() * 1000.0;
    let exponential = policy.multiplier.powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
    let capped_delay = (base_ms * exponential).min(max_ms);

    let jitter_range = capped_delay * policy.jitter_fraction;
    let jitter = if jitter_range > 0.0 {
        rand::thread_rng().gen_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };

    let delay_ms = (capped_delay + jitter).clamp(0.0, max_ms);
    if delay_ms.is_finite() {
        Duration::from_micros((delay_ms * 1000.0).round() as u64)
    } else {
        policy.max_delay
    }
}
