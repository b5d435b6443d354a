//! Reconnection backoff.

use std::time::Duration;

use cl_core::config::ReconnectConfig;

/// Exponential backoff with upward-only jitter.
///
/// Delay for attempt `n` (0-based) is `base * 2^n * (1 + j)` with `j` drawn
/// from `[0, jitter_factor)`, capped at `max_delay`. Since the jitter factor
/// stays below 1 the sequence never decreases.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    jitter_factor: f64,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            max,
            jitter_factor: jitter_factor.clamp(0.0, 0.99),
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay(), config.jitter_factor)
    }

    /// Delay before reconnection attempt `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base.as_millis() as f64;
        let max = self.max.as_millis() as f64;

        // Exponential backoff: base * 2^attempt
        let exponential = base * 2.0_f64.powi(attempt.min(30) as i32);

        let jitter = if self.jitter_factor > 0.0 {
            rand::random::<f64>() * self.jitter_factor
        } else {
            0.0
        };
        let delay = (exponential * (1.0 + jitter)).min(max);

        Duration::from_millis(delay as u64)
    }
}
