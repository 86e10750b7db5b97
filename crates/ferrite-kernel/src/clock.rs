//! Wall clock abstraction.
//!
//! Every deadline, timestamp and time counter in the kernel goes through
//! [`Clock`] so that tests can drive sleeps and timeouts without real
//! waiting.  Production code uses [`SystemClock`].

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Millisecond-resolution wall clock.
pub trait Clock: Send + Sync {
    /// Milliseconds since the UTC unix epoch.
    fn now_millis(&self) -> i64;
}

/// The real clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.  Used by scheduler tests to step
/// through sleep deadlines and event-wait timeouts deterministically.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            millis: AtomicI64::new(start),
        }
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: i64) {
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_only_on_demand() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_millis(), 100);
        clock.advance(50);
        assert_eq!(clock.now_millis(), 150);
        clock.set(1_000);
        assert_eq!(clock.now_millis(), 1_000);
    }
}
