//! Flush timing and retry backoff state for the flush worker.
//!
//! Pure bookkeeping over [`Instant`]s: the worker owns one [`FlushSchedule`]
//! and drives it with the clock's `now`, so the rules can be tested without
//! threads or real time.

use std::time::{Duration, Instant};

use sqlog_core::linear_backoff;

/// What a cycle should do after waking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushAction {
    /// Write the queue to the repository (then prune).
    Flush,
    /// Only enforce the queue bound; no repository calls.
    PruneOnly,
}

/// Next-flush instant, backoff window and consecutive-failure count.
#[derive(Clone, Debug)]
pub struct FlushSchedule {
    flush_time: Instant,
    retry_time: Option<Instant>,
    retry_count: u32,
}

impl FlushSchedule {
    /// A clean schedule whose first flush is due at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            flush_time: now,
            retry_time: None,
            retry_count: 0,
        }
    }

    /// When the worker should next wake on its own.
    pub fn flush_time(&self) -> Instant {
        self.flush_time
    }

    /// End of the current backoff window, if any.
    pub fn retry_time(&self) -> Option<Instant> {
        self.retry_time
    }

    /// Consecutive failed cycles since the last success.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Whether `now` falls inside the backoff window.
    pub fn in_backoff(&self, now: Instant) -> bool {
        self.retry_time.is_some_and(|r| r >= now)
    }

    /// Set the next flush to `now + autoflush_wait`, never later than the end
    /// of an active backoff window.
    pub fn schedule(&mut self, now: Instant, autoflush_wait: Duration) {
        self.flush_time = now + autoflush_wait;
        if let Some(retry_time) = self.retry_time {
            if retry_time >= now && self.flush_time > retry_time {
                self.flush_time = retry_time;
            }
        }
    }

    /// Decide the action for a wake-up. An explicit request always flushes.
    pub fn decide(&self, explicit: bool) -> FlushAction {
        let past_backoff = self.retry_time.is_none_or(|r| self.flush_time >= r);
        if explicit || past_backoff {
            FlushAction::Flush
        } else {
            FlushAction::PruneOnly
        }
    }

    /// Clear the backoff after a successful flush.
    pub fn record_success(&mut self) {
        self.retry_time = None;
        self.retry_count = 0;
    }

    /// Start (or extend) the backoff after a failed cycle. Returns the delay.
    pub fn record_failure(&mut self, now: Instant, increment: Duration, max: Duration) -> Duration {
        let backoff = linear_backoff(self.retry_count, increment, max);
        let retry_time = now + backoff;
        self.retry_time = Some(retry_time);
        if self.flush_time > retry_time {
            self.flush_time = retry_time;
        }
        self.retry_count = self.retry_count.saturating_add(1);
        backoff
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(5);
    const INC: Duration = Duration::from_secs(30);
    const MAX: Duration = Duration::from_secs(3600);

    #[test]
    fn clean_schedule_flushes_after_wait() {
        let t0 = Instant::now();
        let mut s = FlushSchedule::new(t0);
        s.schedule(t0, WAIT);
        assert_eq!(s.flush_time(), t0 + WAIT);
        assert_eq!(s.decide(false), FlushAction::Flush);
        assert!(!s.in_backoff(t0));
    }

    #[test]
    fn first_failure_has_zero_backoff() {
        let t0 = Instant::now();
        let mut s = FlushSchedule::new(t0);
        s.schedule(t0, WAIT);

        let backoff = s.record_failure(t0, INC, MAX);
        assert_eq!(backoff, Duration::ZERO);
        assert_eq!(s.retry_time(), Some(t0));
        assert_eq!(s.flush_time(), t0, "pulled back to the retry time");
        assert_eq!(s.retry_count(), 1);
    }

    #[test]
    fn backoff_grows_linearly_and_caps() {
        let t0 = Instant::now();
        let mut s = FlushSchedule::new(t0);
        let delays: Vec<Duration> = (0..4)
            .map(|_| s.record_failure(t0, INC, Duration::from_secs(75)))
            .collect();
        assert_eq!(
            delays,
            [0, 30, 60, 75].map(Duration::from_secs),
        );
    }

    #[test]
    fn success_clears_backoff() {
        let t0 = Instant::now();
        let mut s = FlushSchedule::new(t0);
        let _ = s.record_failure(t0, INC, MAX);
        let _ = s.record_failure(t0, INC, MAX);
        s.record_success();
        assert_eq!(s.retry_time(), None);
        assert_eq!(s.retry_count(), 0);
    }

    #[test]
    fn schedule_is_pulled_to_active_retry_time() {
        let t0 = Instant::now();
        let mut s = FlushSchedule::new(t0);
        let _ = s.record_failure(t0, INC, MAX);
        let _ = s.record_failure(t0, INC, MAX);
        // Retry at t0 + 30s; a 60s autoflush would oversleep it.
        s.schedule(t0, Duration::from_secs(60));
        assert_eq!(s.flush_time(), t0 + INC);
        assert_eq!(s.decide(false), FlushAction::Flush);
    }

    #[test]
    fn scheduled_wake_inside_backoff_prunes_only() {
        let t0 = Instant::now();
        let mut s = FlushSchedule::new(t0);
        let _ = s.record_failure(t0, INC, MAX);
        let _ = s.record_failure(t0, INC, MAX);
        s.schedule(t0, WAIT);
        assert_eq!(s.flush_time(), t0 + WAIT);
        assert!(s.in_backoff(t0 + WAIT));
        assert_eq!(s.decide(false), FlushAction::PruneOnly);
    }

    #[test]
    fn explicit_request_overrides_backoff() {
        let t0 = Instant::now();
        let mut s = FlushSchedule::new(t0);
        let _ = s.record_failure(t0, INC, MAX);
        let _ = s.record_failure(t0, INC, MAX);
        s.schedule(t0, WAIT);
        assert_eq!(s.decide(true), FlushAction::Flush);
    }

    #[test]
    fn expired_backoff_does_not_pull_schedule() {
        let t0 = Instant::now();
        let mut s = FlushSchedule::new(t0);
        let _ = s.record_failure(t0, INC, MAX);
        let later = t0 + Duration::from_secs(1);
        s.schedule(later, WAIT);
        assert_eq!(s.flush_time(), later + WAIT);
        assert_eq!(s.decide(false), FlushAction::Flush);
    }

    #[test]
    fn retry_count_saturates() {
        let t0 = Instant::now();
        let mut s = FlushSchedule {
            flush_time: t0,
            retry_time: None,
            retry_count: u32::MAX,
        };
        let backoff = s.record_failure(t0, INC, MAX);
        assert_eq!(backoff, MAX);
        assert_eq!(s.retry_count(), u32::MAX);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn flush_time_never_past_active_retry(
                failures in 0u32..20,
                wait_s in 0u64..7200,
                inc_s in 0u64..600,
            ) {
                let t0 = Instant::now();
                let inc = Duration::from_secs(inc_s);
                let mut s = FlushSchedule::new(t0);
                for _ in 0..failures {
                    let _ = s.record_failure(t0, inc, MAX);
                }
                s.schedule(t0, Duration::from_secs(wait_s));
                if let Some(retry) = s.retry_time() {
                    prop_assert!(s.flush_time() <= retry);
                }
                prop_assert!(s.flush_time() <= t0 + Duration::from_secs(wait_s));
            }
        }
    }
}
