//! Retry policy for conflicting workload writes.

use std::time::Duration;

use flipper_core::config::RetryConfig;

/// How many times to retry a version conflict, and how long to wait
/// between attempts.
///
/// The delay after failed attempt `n` (1-based) is
/// `initial_backoff * multiplier^(n-1)`, capped at `max_backoff`. With the
/// default multiplier of `1.0` this is a fixed delay.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total write attempts, including the first.
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            attempts: cfg.attempts.max(1),
            initial_backoff: Duration::from_millis(cfg.initial_backoff_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
            multiplier: cfg.multiplier.max(1.0),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately. Handy in tests.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exp);
        if !scaled.is_finite() || scaled >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(scaled)
    }
}
