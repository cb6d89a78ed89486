//! Time sources.
//!
//! The flush engine schedules on a monotonic [`Instant`] and stamps entries
//! with UTC wall-clock time. Both come from a [`Clock`] so tests can drive
//! time by hand with [`ManualClock`].

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// A source of "now".
pub trait Clock: Send + Sync {
    /// Monotonic now, used for scheduling.
    fn now(&self) -> Instant;

    /// Wall-clock now, used for entry timestamps.
    fn utc_now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    utc_origin: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Start at the current real time.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            utc_origin: Utc::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock();
        *offset = offset.saturating_add(by);
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        let offset = *self.offset.lock();
        chrono::Duration::from_std(offset)
            .ok()
            .and_then(|d| self.utc_origin.checked_add_signed(d))
            .unwrap_or(self.utc_origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_stands_still() {
        let clock = ManualClock::new();
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.now(), a);
    }

    #[test]
    fn manual_clock_advances_both_views() {
        let clock = ManualClock::new();
        let instant = clock.now();
        let utc = clock.utc_now();

        clock.advance(Duration::from_secs(30));

        assert_eq!(clock.now() - instant, Duration::from_secs(30));
        assert_eq!((clock.utc_now() - utc).num_seconds(), 30);
        assert_eq!(clock.elapsed(), Duration::from_secs(30));
    }

    #[test]
    fn system_clock_moves() {
        let clock = SystemClock;
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.now() > a);
    }
}
