//! Retry backoff calculation for the flush engine.
//!
//! Backoff grows linearly with the number of consecutive failures and is
//! capped: `min(increment * retry_count, max)`. The first failure
//! (`retry_count == 0`) waits zero, so one immediate retry is always allowed
//! before the backoff engages.

use std::time::Duration;

/// Calculate the linear backoff delay for a retry count.
///
/// # Arguments
///
/// * `retry_count`: consecutive failures before this one (0 for the first)
/// * `increment`: delay added per failure
/// * `max`: ceiling
#[must_use]
pub fn linear_backoff(retry_count: u32, increment: Duration, max: Duration) -> Duration {
    increment.saturating_mul(retry_count).min(max)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const INC: Duration = Duration::from_secs(30);
    const MAX: Duration = Duration::from_secs(3600);

    #[test]
    fn first_failure_is_immediate() {
        assert_eq!(linear_backoff(0, INC, MAX), Duration::ZERO);
    }

    #[test]
    fn grows_linearly() {
        assert_eq!(linear_backoff(1, INC, MAX), Duration::from_secs(30));
        assert_eq!(linear_backoff(2, INC, MAX), Duration::from_secs(60));
        assert_eq!(linear_backoff(10, INC, MAX), Duration::from_secs(300));
    }

    #[test]
    fn caps_at_max() {
        assert_eq!(linear_backoff(120, INC, MAX), MAX);
        assert_eq!(linear_backoff(1_000, INC, MAX), MAX);
    }

    #[test]
    fn high_count_no_overflow() {
        assert_eq!(linear_backoff(u32::MAX, Duration::MAX, MAX), MAX);
    }

    #[test]
    fn zero_increment_never_waits() {
        assert_eq!(linear_backoff(50, Duration::ZERO, MAX), Duration::ZERO);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn matches_formula(count in 0u32..100_000, inc_ms in 0u64..120_000, max_ms in 0u64..7_200_000) {
                let inc = Duration::from_millis(inc_ms);
                let max = Duration::from_millis(max_ms);
                let expected = inc.saturating_mul(count).min(max);
                prop_assert_eq!(linear_backoff(count, inc, max), expected);
            }

            #[test]
            fn non_decreasing(count in 0u32..u32::MAX, inc_ms in 0u64..120_000, max_ms in 0u64..7_200_000) {
                let inc = Duration::from_millis(inc_ms);
                let max = Duration::from_millis(max_ms);
                prop_assert!(linear_backoff(count, inc, max) <= linear_backoff(count + 1, inc, max));
            }
        }
    }
}
