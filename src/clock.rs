//! Session Clock
//!
//! Monotonic time source for the decision core. All pacing logic (cooldowns,
//! dwell times, metric windows) reads time through this single interface so
//! tests can advance it deterministically - never call system time directly.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// Seconds since session start, millisecond resolution or better.
pub type Seconds = f64;

/// Monotonic clock interface shared by the brain, state machine and metrics.
pub trait Clock: Send + Sync {
    /// Current time in seconds since session start.
    fn now(&self) -> Seconds;
}

/// Shared handle used throughout the core.
pub type SharedClock = Arc<dyn Clock>;

/// Production clock backed by `std::time::Instant`.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Seconds {
        self.start.elapsed().as_secs_f64()
    }
}

/// Hand-advanced clock for deterministic tests.
///
/// Clones share the same underlying time cell, so a test can keep one handle
/// and pass another into the orchestrator.
#[derive(Clone, Default)]
pub struct ManualClock {
    current: Arc<Mutex<Seconds>>,
}

impl ManualClock {
    pub fn new(start: Seconds) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward to an absolute time. Panics on backward movement.
    pub fn set(&self, time: Seconds) {
        let mut current = self.current.lock();
        debug_assert!(
            time >= *current,
            "ManualClock: cannot go backward from {} to {}",
            *current,
            time
        );
        *current = time;
    }

    /// Advance the clock by a non-negative delta.
    pub fn advance(&self, delta: Seconds) {
        debug_assert!(delta >= 0.0, "ManualClock: delta must be non-negative");
        *self.current.lock() += delta;
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> Seconds {
        *self.current.lock()
    }
}
