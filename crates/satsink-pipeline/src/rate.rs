use std::collections::VecDeque;
use std::time::Instant;

/// Moving-window throughput estimate over cumulative byte counters.
///
/// Each update records `(time, total)`. The rate is the byte delta between
/// the oldest and newest sample in the window divided by their time span.
#[derive(Debug, Clone)]
pub struct RateAverager {
    samples: VecDeque<(Instant, u64)>,
    window: usize,
    rate: Option<f64>,
}

impl RateAverager {
    /// Create an averager keeping `window` samples (at least 2).
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            samples: VecDeque::with_capacity(window),
            window,
            rate: None,
        }
    }

    /// Record the cumulative byte count observed at `at`.
    pub fn update(&mut self, total: u64, at: Instant) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back((at, total));

        let (Some(&(t0, b0)), Some(&(t1, b1))) = (self.samples.front(), self.samples.back())
        else {
            return;
        };
        let span = t1.saturating_duration_since(t0).as_secs_f64();
        if span > 0.0 {
            self.rate = Some(b1.saturating_sub(b0) as f64 / span);
        }
    }

    /// Bytes per second, once two samples with distinct times exist.
    pub fn rate(&self) -> Option<f64> {
        self.rate
    }

    /// Number of samples currently held.
    pub fn samples(&self) -> usize {
        self.samples.len()
    }
}
