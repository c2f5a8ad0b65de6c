//! Bounded retry with capped exponential backoff.

use std::time::Duration;

use thiserror::Error;

/// Server statuses treated as transient unless configured otherwise.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Reasons a [`RetryPolicy`] is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("backoff_multiplier must be a finite number >= 1, got {0}")]
    InvalidMultiplier(f64),
}

/// How many times to try an operation and how long to wait in between.
///
/// The delay before retry `n` (1-based attempt that just failed) is
/// `min(base_delay * backoff_multiplier^(n-1), max_delay)`, so the delay
/// sequence never decreases and never exceeds `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    backoff_multiplier: f64,
    max_delay: Duration,
    retryable_statuses: Vec<u16>,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        backoff_multiplier: f64,
        max_delay: Duration,
    ) -> Result<Self, PolicyError> {
        if max_attempts == 0 {
            return Err(PolicyError::ZeroAttempts);
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(PolicyError::InvalidMultiplier(backoff_multiplier));
        }
        Ok(Self {
            max_attempts,
            base_delay,
            backoff_multiplier,
            max_delay,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        })
    }

    /// A single attempt, never retried.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Replace the set of server statuses considered transient.
    pub fn with_retryable_statuses(mut self, statuses: impl Into<Vec<u16>>) -> Self {
        self.retryable_statuses = statuses.into();
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn retryable_statuses(&self) -> &[u16] {
        &self.retryable_statuses
    }

    /// Delay to wait after the given (1-based) attempt failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.base_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);
        let cap = self.max_delay.as_nanos() as f64;
        // Non-finite products fall through to the cap.
        let nanos = if scaled.is_finite() { scaled.min(cap) } else { cap };
        Duration::from_nanos(nanos.round() as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}
