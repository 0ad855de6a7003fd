//! Reconnect backoff controller
//!
//! Delay for attempt `n` (1-based) is `min(initial * multiplier^(n-1), max)`,
//! spread by up to `±jitter` of itself. Attempts are counted from the last
//! time playback was reached.

use rand::Rng;
use std::time::Duration;
use wxyc_common::config::BackoffConfig;

/// Attempt counter and the un-jittered delay for the next attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectAttemptState {
    pub attempt: u32,
    pub next_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct BackoffController {
    policy: BackoffConfig,
    max_attempts: u32,
    state: ReconnectAttemptState,
}

impl BackoffController {
    pub fn new(policy: BackoffConfig, max_attempts: u32) -> Self {
        let state = ReconnectAttemptState {
            attempt: 0,
            next_delay: policy.initial_delay().min(policy.max_delay()),
        };
        Self {
            policy,
            max_attempts,
            state,
        }
    }

    /// Register a failure and schedule the next attempt.
    ///
    /// Returns the 1-based attempt number and its delay, or `None` once
    /// `max_attempts` attempts have already been scheduled.
    pub fn record_failure(&mut self) -> Option<(u32, Duration)> {
        if self.state.attempt >= self.max_attempts {
            return None;
        }
        self.state.attempt += 1;
        let attempt = self.state.attempt;
        let delay = self.jittered(self.delay_for(attempt));
        self.state.next_delay = self.delay_for(attempt + 1);
        Some((attempt, delay))
    }

    /// Forget all failures (playback was reached, or a fresh `play()`)
    pub fn reset(&mut self) {
        self.state = ReconnectAttemptState {
            attempt: 0,
            next_delay: self.delay_for(1),
        };
    }

    /// Attempts scheduled since the last reset
    pub fn attempts(&self) -> u32 {
        self.state.attempt
    }

    pub fn state(&self) -> ReconnectAttemptState {
        self.state
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Un-jittered delay for attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let initial = self.policy.initial_delay_ms as f64;
        let max = self.policy.max_delay_ms as f64;
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let delay = (initial * self.policy.multiplier.powi(exponent)).min(max);
        Duration::from_millis(delay as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = self.policy.jitter;
        if jitter <= 0.0 {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        Duration::from_secs_f64(delay.as_secs_f64() * factor.max(0.0))
    }
}
