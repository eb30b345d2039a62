//! Clock sources that drive the scheduler's tick.
//!
//! The scheduler never reads wall time itself; whoever runs the loop pulls
//! a delta from a `ClockSource` and hands it to `tick`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Anything that can produce the elapsed time (ms) since its previous call
pub trait ClockSource {
    /// Milliseconds since the previous call. May block until the next tick is due.
    fn next_delta_ms(&mut self) -> f64;
}

/// Synthetic clock for tests and offline simulation
#[derive(Debug, Clone)]
pub struct ManualClock {
    step_ms: f64,
    scripted: VecDeque<f64>,
    elapsed_ms: f64,
}

impl ManualClock {
    /// Clock that advances by `step_ms` on every call
    pub fn fixed(step_ms: f64) -> Self {
        Self {
            step_ms,
            scripted: VecDeque::new(),
            elapsed_ms: 0.0,
        }
    }

    /// Clock that replays `deltas` in order, then falls back to 0
    pub fn scripted(deltas: impl IntoIterator<Item = f64>) -> Self {
        Self {
            step_ms: 0.0,
            scripted: deltas.into_iter().collect(),
            elapsed_ms: 0.0,
        }
    }

    pub fn push(&mut self, delta_ms: f64) {
        self.scripted.push_back(delta_ms);
    }

    /// Sum of all deltas handed out so far
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ms
    }
}

impl ClockSource for ManualClock {
    fn next_delta_ms(&mut self) -> f64 {
        let delta = self.scripted.pop_front().unwrap_or(self.step_ms);
        self.elapsed_ms += delta;
        delta
    }
}

/// Real-time clock firing at a fixed rate
///
/// Sleeps until the next tick is due, then reports the measured delta, so a
/// slow consumer sees larger deltas instead of a slower clock.
#[derive(Debug, Clone)]
pub struct IntervalClock {
    interval: Duration,
    last: Instant,
    next_due: Instant,
}

impl IntervalClock {
    pub fn new(hz: f64) -> Self {
        let hz = if hz.is_finite() && hz > 0.0 { hz } else { 60.0 };
        let interval = Duration::from_secs_f64(1.0 / hz);
        let now = Instant::now();
        Self {
            interval,
            last: now,
            next_due: now + interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl ClockSource for IntervalClock {
    fn next_delta_ms(&mut self) -> f64 {
        let now = Instant::now();
        if now < self.next_due {
            std::thread::sleep(self.next_due - now);
        }
        let now = Instant::now();
        let delta = now.duration_since(self.last);
        self.last = now;
        // Skip missed ticks rather than bursting to catch up
        self.next_due += self.interval;
        if self.next_due < now {
            self.next_due = now + self.interval;
        }
        delta.as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let mut clock = ManualClock::fixed(16.5);
        assert_eq!(clock.next_delta_ms(), 16.5);
        assert_eq!(clock.next_delta_ms(), 16.5);
        assert_eq!(clock.elapsed_ms(), 33.0);
    }

    #[test]
    fn test_scripted_clock() {
        let mut clock = ManualClock::scripted([10.0, 20.0]);
        clock.push(5.0);
        assert_eq!(clock.next_delta_ms(), 10.0);
        assert_eq!(clock.next_delta_ms(), 20.0);
        assert_eq!(clock.next_delta_ms(), 5.0);
        assert_eq!(clock.next_delta_ms(), 0.0);
    }

    #[test]
    fn test_interval_clock_paces() {
        let mut clock = IntervalClock::new(200.0);
        let started = Instant::now();
        let mut total = 0.0;
        for _ in 0..3 {
            total += clock.next_delta_ms();
        }
        // Three 5 ms ticks
        assert!(started.elapsed() >= Duration::from_millis(14));
        assert!(total >= 14.0);
    }

    #[test]
    fn test_interval_clock_rejects_bad_rate() {
        assert_eq!(IntervalClock::new(0.0).interval(), Duration::from_secs_f64(1.0 / 60.0));
    }
}
