//! Reconnect delay computation.
//!
//! The schedule is pure and deterministic: the delay for a given attempt
//! ordinal is always the same value, so observers can predict and tests can
//! assert the exact timing of the reconnection loop.

use std::time::Duration;

use crate::core::{RETRY_BASE_DELAY, RETRY_MAX_DELAY};

/// Largest exponent applied to the base delay; beyond this the cap always
/// dominates for any practical configuration.
const MAX_DELAY_SHIFT: u32 = 16;

/// Capped exponential backoff policy for reconnect scheduling.
///
/// `delay_for(n)` grows as `base * 2^n` up to `cap`. The attempt ordinal is
/// managed by the caller; it resets to zero on every successful connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before attempt ordinal zero.
    base: Duration,
    /// Ceiling applied to the exponential schedule.
    cap: Duration,
    /// Give up after this many failed attempts (`None`: never give up).
    max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RETRY_BASE_DELAY, RETRY_MAX_DELAY)
    }
}

impl RetryPolicy {
    /// Create a policy with the given base delay and ceiling.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            max_retries: None,
        }
    }

    /// Limit the number of reconnect attempts.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    /// Delay to wait before the attempt with the given ordinal.
    pub fn delay_for(&self, ordinal: u32) -> Duration {
        let factor = 1u32 << ordinal.min(MAX_DELAY_SHIFT);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Whether the attempt with the given ordinal exceeds the retry budget.
    pub fn is_exhausted(&self, ordinal: u32) -> bool {
        match self.max_retries {
            Some(max) => ordinal >= max,
            None => false,
        }
    }

    /// The configured base delay.
    pub fn base(&self) -> Duration {
        self.base
    }

    /// The configured delay ceiling.
    pub fn cap(&self) -> Duration {
        self.cap
    }
}
