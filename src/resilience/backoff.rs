//! Exponential backoff delay calculation.
//!
//! Used by the connection pool between retry attempts and by the circuit
//! breaker's exponential recovery mode.

use std::time::Duration;

use rand::Rng;

/// Largest exponent applied to the multiplier.
const MAX_EXPONENT: u32 = 30;

/// Exponential backoff schedule.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base * multiplier^attempt, max) + jitter
/// ```
///
/// `attempt` is 0-indexed, so the first retry waits `base`. With the pool
/// defaults (1s base, 10s cap, no jitter) delays are 1s, 2s, 4s, 8s, 10s.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
    jitter: Duration,
}

impl ExponentialBackoff {
    /// Creates a doubling schedule without jitter.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            multiplier: 2.0,
            jitter: Duration::ZERO,
        }
    }

    /// Sets the growth factor (values below 1.0 are raised to 1.0).
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Adds up to `jitter` of random delay to every step.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Base delay.
    #[must_use]
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay cap, before jitter.
    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Returns the delay before retry number `attempt` (0-indexed).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.capped(attempt) + self.random_jitter()
    }

    /// Returns the deterministic part of [`delay`](Self::delay).
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn capped(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.min(MAX_EXPONENT)).unwrap_or(i32::MAX);
        let base_ms = self.base.as_millis() as f64;
        let max_ms = self.max.as_millis() as f64;

        let delay_ms = (base_ms * self.multiplier.powi(exponent)).min(max_ms);

        Duration::from_millis(delay_ms as u64)
    }

    fn random_jitter(&self) -> Duration {
        let bound = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=bound))
    }
}
