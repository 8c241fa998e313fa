use std::time::Duration;

pub const DEFAULT_BACKOFF_BASE_MS: u64 = 100;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 5_000;

/// Delay applied after consecutive recoverable receive errors so a broker
/// that keeps failing is not polled in a hot loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorBackoff {
    base: Duration,
    max: Duration,
}

impl ErrorBackoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base: Duration::from_millis(base_ms),
            max: Duration::from_millis(max_ms.max(base_ms)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Doubles from `base` with each consecutive failure, capped at `max`.
    /// Zero failures means no delay.
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let Some(doublings) = consecutive_failures.checked_sub(1) else {
            return Duration::ZERO;
        };

        self.base
            .saturating_mul(1u32 << doublings.min(31))
            .min(self.max)
    }
}

impl Default for ErrorBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays_ms(backoff: ErrorBackoff, failures: impl IntoIterator<Item = u32>) -> Vec<u128> {
        failures
            .into_iter()
            .map(|count| backoff.delay(count).as_millis())
            .collect()
    }

    #[test]
    fn delay_doubles_per_failure_until_cap() {
        let backoff = ErrorBackoff::new(250, 3_000);
        assert_eq!(
            delays_ms(backoff, 0..=6),
            vec![0, 250, 500, 1_000, 2_000, 3_000, 3_000]
        );
    }

    #[test]
    fn default_backoff_reaches_its_ceiling() {
        let backoff = ErrorBackoff::default();
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(7), Duration::from_millis(5_000));
    }

    #[test]
    fn long_failure_streaks_do_not_overflow() {
        let backoff = ErrorBackoff::new(u64::MAX / 2, u64::MAX);
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn disabled_backoff_never_waits() {
        let backoff = ErrorBackoff::disabled();
        assert_eq!(backoff.delay(1), Duration::ZERO);
        assert_eq!(backoff.delay(30), Duration::ZERO);
    }

    #[test]
    fn max_below_base_is_raised_to_base() {
        let backoff = ErrorBackoff::new(500, 10);
        assert_eq!(backoff.delay(3), Duration::from_millis(500));
    }
}
