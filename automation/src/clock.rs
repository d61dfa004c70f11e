//! Time source and interruptible sleep used by the scheduling loops.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use hardware::cancel::CancelToken;
use time::OffsetDateTime;

/// Monotonic time, UTC time and cancellable sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn utc(&self) -> OffsetDateTime;

    /// Sleep for `duration` unless `cancel` fires first.
    ///
    /// Returns `true` if the sleep was cut short by cancellation.
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool;
}

/// Wall clock; sleeps wake immediately on cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        cancel.wait_timeout(duration)
    }
}

/// Simulated clock that advances instantly when slept on.
///
/// Records every requested sleep so tests can check cadence without waiting.
#[derive(Debug)]
pub struct VirtualClock {
    start: Instant,
    start_utc: OffsetDateTime,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl VirtualClock {
    pub fn new(start_utc: OffsetDateTime) -> Self {
        Self {
            start: Instant::now(),
            start_utc,
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Move time forward without recording a sleep (simulated work).
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner) += duration;
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn utc(&self) -> OffsetDateTime {
        self.start_utc + self.elapsed()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            return true;
        }
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
        self.advance(duration);
        cancel.is_cancelled()
    }
}
