//! Venue call latency tracking
//!
//! Every gateway call records its wall-clock duration here. The risk
//! engine's latency kill-switch reads the rolling average.

use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub struct LatencyTracker {
    window: usize,
    samples: Mutex<VecDeque<Duration>>,
}

impl LatencyTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: Mutex::new(VecDeque::with_capacity(window.max(1))),
        }
    }

    pub fn record(&self, elapsed: Duration) {
        let mut samples = self.samples.lock().expect("latency tracker poisoned");
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(elapsed);
    }

    /// Average latency in seconds over the window; zero with no samples.
    pub fn average_secs(&self) -> Decimal {
        let samples = self.samples.lock().expect("latency tracker poisoned");
        if samples.is_empty() {
            return Decimal::ZERO;
        }
        let total_ms: u128 = samples.iter().map(|d| d.as_millis()).sum();
        let avg_ms = total_ms / samples.len() as u128;
        Decimal::from(avg_ms as i64) / Decimal::from(1000)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.lock().expect("latency tracker poisoned").len()
    }
}
