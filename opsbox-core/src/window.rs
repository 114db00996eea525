//! Rolling sample window backing adapter metadata.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

struct Sample {
    latency: Duration,
    success: bool,
}

/// Bounded rolling window of per-call latency and success samples.
///
/// Every outbound adapter call records a sample; `getMetadata` reads the
/// aggregates. Internally synchronized - losing an occasional sample under
/// contention is acceptable, so the lock is never held across awaits.
pub struct RollingWindow {
    samples: Mutex<VecDeque<Sample>>,
    capacity: usize,
}

impl RollingWindow {
    /// Creates a window keeping at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Records one call outcome.
    pub fn record(&self, latency: Duration, success: bool) {
        let Ok(mut samples) = self.samples.lock() else {
            return;
        };
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(Sample { latency, success });
    }

    /// Average latency over the window, in milliseconds.
    pub fn avg_latency_ms(&self) -> f64 {
        let Ok(samples) = self.samples.lock() else {
            return 0.0;
        };
        if samples.is_empty() {
            return 0.0;
        }
        let total: f64 = samples.iter().map(|s| s.latency.as_secs_f64() * 1000.0).sum();
        total / samples.len() as f64
    }

    /// Fraction of successful calls over the window; 1.0 when empty.
    pub fn success_rate(&self) -> f64 {
        let Ok(samples) = self.samples.lock() else {
            return 1.0;
        };
        if samples.is_empty() {
            return 1.0;
        }
        let ok = samples.iter().filter(|s| s.success).count();
        ok as f64 / samples.len() as f64
    }

    /// Latency percentile over the window, in milliseconds.
    ///
    /// `p` is a fraction in [0, 1]; returns 0 when the window is empty.
    pub fn percentile_ms(&self, p: f64) -> f64 {
        let Ok(samples) = self.samples.lock() else {
            return 0.0;
        };
        if samples.is_empty() {
            return 0.0;
        }
        let mut latencies: Vec<f64> = samples
            .iter()
            .map(|s| s.latency.as_secs_f64() * 1000.0)
            .collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = (p.clamp(0.0, 1.0) * (latencies.len() - 1) as f64).round() as usize;
        latencies[rank]
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Whether the window holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(256)
    }
}
