//! Exponential backoff for reopening live sources.
//!
//! A worker reading a live stream treats read failures as transient: it
//! releases the source, sleeps, and reopens. Delays start at
//! [`ReconnectPolicy::initial_delay_ms`] and grow by
//! [`ReconnectPolicy::multiplier`] up to [`ReconnectPolicy::max_delay_ms`].
//! After [`ReconnectPolicy::max_attempts`] consecutive failed reopens the
//! source is considered gone for good.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunable parameters for the reconnect strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first reopen attempt.
    pub initial_delay_ms: u64,
    /// Upper bound on the delay between attempts.
    pub max_delay_ms: u64,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Consecutive failed reopen attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Next delay after `current`, clamped to the maximum.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay())
    }
}

/// Tracks consecutive reopen attempts against a [`ReconnectPolicy`].
#[derive(Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    delay: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let delay = policy.initial_delay();
        Self {
            policy,
            delay,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt, or `None` once the attempt
    /// budget is spent.
    pub fn next_attempt(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        let delay = self.delay;
        self.delay = self.policy.next_delay(self.delay);
        Some(delay)
    }

    /// Consecutive attempts made since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Called after a successful read.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay = self.policy.initial_delay();
    }
}
