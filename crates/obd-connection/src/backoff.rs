//! Reconnection backoff

use std::time::Duration;

/// Exponential backoff between connection attempts.
///
/// `delay(0)` is zero; afterwards the delay doubles from `min_delay` per
/// recorded failure, the exponent stops growing at `cap_exp` and the result
/// never exceeds `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure. Default: 5s.
    pub min_delay: Duration,
    /// Upper bound on any delay. Default: 30s.
    pub max_delay: Duration,
    /// Largest exponent applied to `min_delay`. Default: 10.
    pub cap_exp: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            cap_exp: 10,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt after `attempts` recorded failures
    pub fn delay(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let exp = (attempts - 1).min(self.cap_exp);
        let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
        self.min_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Time left to wait given how long ago the last failure happened
    pub fn remaining(&self, attempts: u32, since_failure: Duration) -> Duration {
        self.delay(attempts).saturating_sub(since_failure)
    }
}
