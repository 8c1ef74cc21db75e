//! Linear-backoff reconnection policy for job sessions.
//!
//! When a job's WebSocket connection closes abnormally the session retries
//! with a delay that grows linearly with the attempt number, up to a hard
//! attempt cap. Quick recovery from short network blips is favoured over
//! aggressive retry during long outages.

use std::time::Duration;

/// Delay before the first reconnection attempt; later attempts multiply it.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(3000);

/// Consecutive failed attempts tolerated before a session gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Tunable parameters for the linear-backoff strategy.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Delay multiplied by the attempt number.
    pub base_delay: Duration,
    /// Attempt cap; exceeding it ends the session.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt: `base_delay × attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Whether the given 1-based attempt may still be scheduled.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}
