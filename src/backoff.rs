//! Reconnection delay policy.

use std::time::Duration;

/// Decides whether reconnect attempt `attempt` (1-based) may run and how long
/// to wait before it.
pub trait BackoffPolicy: Send + Sync {
    fn next_delay(&self, attempt: u32) -> Duration;
    fn should_retry(&self, attempt: u32) -> bool;
}

/// `base_delay * attempt`, at most `max_attempts` attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl LinearBackoff {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 3)
    }
}

impl BackoffPolicy for LinearBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1))
    }

    fn should_retry(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }
}
