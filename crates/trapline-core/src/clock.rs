//! Session clock: the single source of monotonic timestamps.
//!
//! Every timestamp the registry, reconciler, and scheduler see comes from a
//! [`Clock`]. Production uses [`MonotonicClock`], which reads the tokio
//! clock (and therefore honours paused time in tests). Deterministic tests
//! and the dry-run field use [`ManualClock`], which only moves when told.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::Instant;
use trapline_types::Timestamp;

/// A source of monotonic session timestamps.
pub trait Clock: Send + Sync {
    /// The current session time.
    fn now(&self) -> Timestamp;
}

/// Clock backed by [`tokio::time::Instant`], starting at zero on creation.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    /// Instant the session started.
    origin: Instant,
}

impl MonotonicClock {
    /// Start a new clock at zero.
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        let elapsed = self.origin.elapsed().as_millis();
        Timestamp::from_millis(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }
}

/// Clock that advances only when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    /// Current offset in milliseconds.
    millis: AtomicU64,
}

impl ManualClock {
    /// Create a clock at `start`.
    pub const fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicU64::new(start.as_millis()),
        }
    }

    /// Move the clock forward by `millis`. Returns the new time.
    pub fn advance(&self, millis: u64) -> Timestamp {
        let previous = self
            .millis
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(millis))
            })
            .unwrap_or_else(|current| current);
        Timestamp::from_millis(previous.saturating_add(millis))
    }

    /// Jump the clock to `at`. Moving backwards is ignored.
    pub fn set(&self, at: Timestamp) {
        self.millis.fetch_max(at.as_millis(), Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(Timestamp::ZERO);
        assert_eq!(clock.advance(600), Timestamp::from_millis(600));
        assert_eq!(clock.advance(400), Timestamp::from_millis(1_000));
        assert_eq!(clock.now(), Timestamp::from_millis(1_000));
    }

    #[test]
    fn manual_clock_never_moves_backwards() {
        let clock = ManualClock::new(Timestamp::from_secs(10));
        clock.set(Timestamp::from_secs(5));
        assert_eq!(clock.now(), Timestamp::from_secs(10));
        clock.set(Timestamp::from_secs(12));
        assert_eq!(clock.now(), Timestamp::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn monotonic_clock_follows_tokio_time() {
        let clock = MonotonicClock::start();
        assert_eq!(clock.now(), Timestamp::ZERO);
        tokio::time::sleep(std::time::Duration::from_millis(1_500)).await;
        assert_eq!(clock.now(), Timestamp::from_millis(1_500));
    }
}
