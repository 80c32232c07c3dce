//! Reconnect backoff policy.
//!
//! `delay = min(base * 2^attempt, cap)`, scaled by a random factor in
//! `[1 - jitter, 1 + jitter]` so a fleet of clients dropped by the same
//! outage does not reconnect in lockstep.
//!
//! # Invariants
//!
//! - Every delay is `<= cap`.
//! - Within one failure streak (between two [`Backoff::reset`] calls) delays
//!   never decrease. Jitter alone could make a later delay shorter than an
//!   earlier one once the nominal delay saturates at the cap, so each delay is
//!   floored at its predecessor.

use std::time::Duration;

use crate::error::ConfigError;

/// Largest exponent applied to the base delay. Any realistic cap is reached
/// long before, and it keeps the shift in range.
const MAX_EXPONENT: u32 = 31;

/// Exponential backoff with bounded jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter: f64,
    last: Option<Duration>,
}

impl Backoff {
    /// Create a backoff policy.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidBackoff` if `base` is zero or exceeds `cap`
    /// - `ConfigError::InvalidJitter` if `jitter` is outside `[0, 1)`
    pub fn new(base: Duration, cap: Duration, jitter: f64) -> Result<Self, ConfigError> {
        if base.is_zero() || base > cap {
            return Err(ConfigError::InvalidBackoff { base, cap });
        }
        if !(0.0..1.0).contains(&jitter) {
            return Err(ConfigError::InvalidJitter(jitter));
        }
        Ok(Self { base, cap, jitter, last: None })
    }

    /// Delay before jitter for the given attempt.
    ///
    /// Monotonically non-decreasing in `attempt`, saturating at the cap.
    #[must_use]
    pub fn nominal(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_EXPONENT);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay for the given attempt, using `random` as the jitter source.
    pub fn next_delay(&mut self, attempt: u32, random: u64) -> Duration {
        // 53 high bits give a uniform f64 in [0, 1)
        let unit = (random >> 11) as f64 / (1u64 << 53) as f64;
        let factor = 1.0 + self.jitter * (2.0 * unit - 1.0);

        let jittered = self.nominal(attempt).mul_f64(factor).min(self.cap);
        let delay = self.last.map_or(jittered, |last| jittered.max(last));

        self.last = Some(delay);
        delay
    }

    /// Start a new failure streak.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Maximum delay.
    #[must_use]
    pub fn cap(&self) -> Duration {
        self.cap
    }
}
