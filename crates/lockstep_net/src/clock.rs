//! # Tick Clocks
//!
//! The session measures every timer in simulation tics. A [`Clock`] says
//! which tic it is and knows how to wait for the next one; that wait is the
//! only blocking operation of the whole layer.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Simulation tic counter. Wraps after about four years at 35 Hz.
pub type Tick = u32;

/// Source of simulation time.
pub trait Clock {
    /// Current tic.
    fn now(&self) -> Tick;

    /// Blocks until the next tic boundary.
    fn sleep_until_next_tick(&self);
}

/// Wall clock running at a fixed tick rate.
#[derive(Clone, Debug)]
pub struct TickClock {
    /// Time of tic 0.
    start: Instant,
    /// Target tick duration.
    tick_duration: Duration,
}

impl TickClock {
    /// Creates a clock starting at tic 0 now.
    ///
    /// # Panics
    ///
    /// Panics if `tick_rate` is zero.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        assert!(tick_rate > 0, "tick rate must be positive");
        Self {
            start: Instant::now(),
            tick_duration: Duration::from_micros(1_000_000 / u64::from(tick_rate)),
        }
    }

    /// Returns the target tick duration.
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }
}

impl Clock for TickClock {
    fn now(&self) -> Tick {
        let elapsed = self.start.elapsed().as_micros();
        (elapsed / self.tick_duration.as_micros()) as Tick
    }

    fn sleep_until_next_tick(&self) {
        let target = self.tick_duration * (self.now() + 1);
        let elapsed = self.start.elapsed();
        if elapsed >= target {
            return;
        }

        let remaining = target - elapsed;
        // Sleep for most of the time, spin the rest.
        if remaining > Duration::from_micros(1000) {
            std::thread::sleep(remaining - Duration::from_micros(500));
        }
        while self.start.elapsed() < target {
            std::hint::spin_loop();
        }
    }
}

/// Deterministic clock for tests and simulations.
///
/// Clones share the same counter, so one handle can drive the sessions
/// that hold the others. Sleeping advances the clock by one tic.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    /// Creates a clock at tic 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock at `tick`.
    #[must_use]
    pub fn starting_at(tick: Tick) -> Self {
        let clock = Self::new();
        clock.set(tick);
        clock
    }

    /// Moves time forward by `ticks`.
    pub fn advance(&self, ticks: Tick) {
        self.now.fetch_add(ticks, Ordering::Relaxed);
    }

    /// Jumps to `tick`.
    pub fn set(&self, tick: Tick) {
        self.now.store(tick, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Tick {
        self.now.load(Ordering::Relaxed)
    }

    fn sleep_until_next_tick(&self) {
        self.advance(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_shared() {
        let clock = ManualClock::new();
        let handle = clock.clone();

        clock.advance(5);
        assert_eq!(handle.now(), 5);

        handle.sleep_until_next_tick();
        assert_eq!(clock.now(), 6);

        clock.set(100);
        assert_eq!(handle.now(), 100);
        assert_eq!(ManualClock::starting_at(7).now(), 7);
    }

    #[test]
    fn test_tick_clock_advances() {
        let clock = TickClock::new(1000);
        assert_eq!(clock.tick_duration(), Duration::from_millis(1));

        let before = clock.now();
        clock.sleep_until_next_tick();
        assert!(clock.now() > before);
    }
}
