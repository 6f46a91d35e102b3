//! Reconnection controller: bounded exponential backoff with jitter.
//!
//! `delay(attempt) = min(base * 2^attempt, max) + uniform(0..=jitter)`
//!
//! The attempt counter only moves when a scheduled retry actually fires and
//! is reset by a successful open. At most one retry is pending at a time.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::ClientConfig;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.reconnect_delay_ms),
            max_delay: Duration::from_millis(config.max_reconnect_delay_ms),
            max_jitter: Duration::from_millis(config.reconnect_jitter_ms),
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay before retry number `attempt + 1`, without jitter.
    ///
    /// Non-decreasing in `attempt` and never above `max_delay`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    /// Delay before retry number `attempt + 1`, including random jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.base_delay_for(attempt) + Duration::from_millis(jitter)
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Outcome of asking the controller to schedule a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Schedule {
    /// A retry will fire after the given delay.
    Scheduled(Duration),
    /// A retry is already pending; nothing changed.
    AlreadyPending,
    /// The retry budget is spent.
    Exhausted,
}

#[derive(Debug)]
pub(crate) struct ReconnectController {
    policy: BackoffPolicy,
    attempts: u32,
    retry_at: Option<Instant>,
}

impl ReconnectController {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            retry_at: None,
        }
    }

    pub fn schedule(&mut self, now: Instant) -> Schedule {
        if self.retry_at.is_some() {
            return Schedule::AlreadyPending;
        }
        if self.policy.is_exhausted(self.attempts) {
            return Schedule::Exhausted;
        }
        let delay = self.policy.delay_for(self.attempts);
        self.retry_at = Some(now + delay);
        Schedule::Scheduled(delay)
    }

    /// Consume the pending retry. Returns the new attempt number.
    pub fn fire(&mut self) -> u32 {
        self.retry_at = None;
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    /// Bring a pending retry forward to `now` (network came back online).
    pub fn expedite(&mut self, now: Instant) -> bool {
        match self.retry_at {
            Some(_) => {
                self.retry_at = Some(now);
                true
            },
            None => false,
        }
    }

    /// Give back the attempt counted by `fire` when that retry was abandoned
    /// before the handshake could succeed or fail.
    pub fn refund(&mut self) {
        self.attempts = self.attempts.saturating_sub(1);
    }

    pub fn cancel(&mut self) {
        self.retry_at = None;
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.retry_at = None;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }
}
