//! Manually advanced clock for deterministic tests.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use wellspring_core::clock::Clock;

/// Clock whose time only moves when the test says so.
///
/// `sleep` never suspends: it advances the clock by the requested duration
/// and returns, so retry loops and TTL checks run instantly under test
/// while still observing consistent timestamps.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    /// Create a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Move time forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock();
        *now += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
