//! Time source seam for paced playback.
//!
//! `SystemClock` is the real monotonic clock. `ManualClock` only moves when it
//! is told to (or when something sleeps on it), which lets pacing be tested
//! without wall-clock flakiness.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub trait Clock: Send {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Monotonic OS clock with real sleeps.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock. Clones share the same timeline.
#[derive(Clone, Debug)]
pub struct ManualClock {
    origin: Instant,
    state: Arc<Mutex<ManualState>>,
}

#[derive(Debug, Default)]
struct ManualState {
    offset: Duration,
    slept: Duration,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Arc::new(Mutex::new(ManualState::default())),
        }
    }

    /// Move the timeline forward, e.g. to simulate a slow consumer.
    pub fn advance(&self, by: Duration) {
        self.state().offset += by;
    }

    /// Total time spent in `sleep` so far.
    pub fn total_slept(&self) -> Duration {
        self.state().slept
    }

    /// Time elapsed on this timeline since construction.
    pub fn elapsed(&self) -> Duration {
        self.state().offset
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.state().offset
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state();
        state.offset += duration;
        state.slept += duration;
    }
}
