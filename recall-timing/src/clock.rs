use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::timer::Timer;

/// Schedules presentation time ahead of the wall clock.
///
/// `delay` only moves a target forward; nothing sleeps until `wait`. This
/// lets a caller queue the inter-stimulus interval and then block exactly
/// once right before the next screen flip.
pub struct PresentationClock<T: Timer> {
    timer: T,
    target_ns: u64,
    rng: StdRng,
}

impl<T: Timer> PresentationClock<T> {
    pub fn new(timer: T) -> Self {
        Self::with_rng(timer, StdRng::from_os_rng())
    }

    /// Jitter draws come from `rng`, which never touches list allocation.
    pub fn with_rng(timer: T, rng: StdRng) -> Self {
        let target_ns = timer.now();
        Self {
            timer,
            target_ns,
            rng,
        }
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn now(&self) -> u64 {
        self.timer.now()
    }

    /// Resets the schedule to the current instant.
    pub fn tare(&mut self) {
        self.target_ns = self.timer.now();
    }

    /// Queues `ms` plus a uniform draw from `0..=jitter_ms`. A schedule that
    /// has fallen behind the wall clock restarts from now.
    pub fn delay(&mut self, ms: u64, jitter_ms: u64) -> u64 {
        let extra = if jitter_ms > 0 {
            self.rng.random_range(0..=jitter_ms)
        } else {
            0
        };
        let total_ms = ms + extra;
        let base = self.target_ns.max(self.timer.now());
        self.target_ns = base + total_ms * 1_000_000;
        total_ms
    }

    /// Blocks until the queued target is reached.
    pub fn wait(&mut self) {
        let now = self.timer.now();
        if self.target_ns > now {
            self.timer.sleep(Duration::from_nanos(self.target_ns - now));
        }
    }

    pub fn target(&self) -> u64 {
        self.target_ns
    }
}
