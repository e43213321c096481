//! Clock abstraction
//!
//! Every timestamp the engine compares (cooldowns, reading delays, write
//! debounce) comes from a [`Clock`], so tests can drive time by hand.

use std::sync::atomic::{AtomicI64, Ordering};

/// Source of wall-clock milliseconds since the Unix epoch
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> i64;
}

/// System clock backed by chrono
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Move the clock forward and return the new time
    pub fn advance(&self, delta_ms: i64) -> i64 {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst) + delta_ms
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let t1 = clock.now_millis();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let t2 = clock.now_millis();

        assert!(t2 >= t1 + 10);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_700_000_000_000);
        assert_eq!(clock.now_millis(), 1_700_000_000_000);

        assert_eq!(clock.advance(250), 1_700_000_000_250);
        assert_eq!(clock.now_millis(), 1_700_000_000_250);

        clock.set(5);
        assert_eq!(clock.now_millis(), 5);
    }
}
