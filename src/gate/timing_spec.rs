use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected [`TimingSpec`] parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("Timing interval must be greater than zero")]
    ZeroInterval,
}

/// Rate-limiting policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    /// Debounce: collapse a burst into its last call.
    #[default]
    Coalesce,
    /// Throttle: at most one invocation per interval.
    Cap,
}

/// How a [`TimingGate`](super::TimingGate) shapes its input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingSpec {
    mode: GateMode,
    interval: Duration,
    leading: bool,
}

impl TimingSpec {
    pub fn new(mode: GateMode, interval: Duration, leading: bool) -> Result<Self, GateError> {
        if interval.is_zero() {
            return Err(GateError::ZeroInterval);
        }
        Ok(Self {
            mode,
            interval,
            leading,
        })
    }

    /// Trailing-only debounce.
    pub fn coalesce(interval: Duration) -> Result<Self, GateError> {
        Self::new(GateMode::Coalesce, interval, false)
    }

    /// Throttle that fires the first call of a window immediately.
    pub fn cap(interval: Duration) -> Result<Self, GateError> {
        Self::new(GateMode::Cap, interval, true)
    }

    pub fn with_leading(mut self, leading: bool) -> Self {
        self.leading = leading;
        self
    }

    pub fn mode(&self) -> GateMode {
        self.mode
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn leading(&self) -> bool {
        self.leading
    }
}
