//! Injectable time source so scheduling decisions (stuck detection,
//! deadlines, backoff) can be tested deterministically without sleeping.

use std::time::{SystemTime, UNIX_EPOCH};

/// A source of monotonic-enough wall-clock time, in milliseconds.
///
/// Production code uses [`SystemClock`]; tests can substitute a fake that
/// advances on command.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;

    /// Elapsed milliseconds since `earlier`, saturating at zero if the
    /// clock has gone backwards (which a fake clock in tests should never
    /// do, but `SystemTime` can).
    fn elapsed_millis_since(&self, earlier: u64) -> u64 {
        self.now_millis().saturating_sub(earlier)
    }
}

/// The real wall clock, backed by [`SystemTime::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeClock(AtomicU64);

    impl Clock for FakeClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn elapsed_since_advances_with_fake_clock() {
        let clock = FakeClock(AtomicU64::new(1_000));
        assert_eq!(clock.elapsed_millis_since(400), 600);
        clock.0.store(1_500, Ordering::SeqCst);
        assert_eq!(clock.elapsed_millis_since(400), 1_100);
    }

    #[test]
    fn elapsed_since_saturates_at_zero_when_earlier_is_in_future() {
        let clock = FakeClock(AtomicU64::new(100));
        assert_eq!(clock.elapsed_millis_since(500), 0);
    }

    #[test]
    fn system_clock_now_millis_is_nonzero() {
        assert!(SystemClock.now_millis() > 0);
    }
}
