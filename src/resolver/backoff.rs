//! Retry delays for opening pixel buffers under lock contention.
//!
//! The policy is stateless: callers pass the attempt number and the time
//! already spent waiting, and get back a delay or a give-up decision.

use std::time::Duration;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(50);

/// Default ceiling on a single retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(2);

/// Default total time to wait for a locked buffer before giving up.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(10);

/// Bounded exponential backoff with a total wait budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Ceiling on any single delay
    pub max_delay: Duration,

    /// Growth factor between attempts (values below 1 are treated as 1)
    pub multiplier: f64,

    /// Total time after which retrying stops
    pub max_wait: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: 2.0,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration, max_wait: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_wait,
            ..Default::default()
        }
    }

    /// Delay to sleep after failed attempt number `attempt` (0-based).
    ///
    /// Non-decreasing in `attempt` and never above `max_delay`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay).min(self.max_delay)
    }

    /// Whether to stop retrying after `attempt` attempts and `elapsed` time.
    pub fn should_give_up(&self, _attempt: u32, elapsed: Duration) -> bool {
        elapsed >= self.max_wait
    }
}
