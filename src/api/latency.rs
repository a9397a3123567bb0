//! Base predictor call latency, recorded by the refresh orchestrator and read by `/stats/latency`.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

/// Tracks 1µs to 10 minutes at 3 significant figures; LLM calls are slow.
const MAX_TRACKABLE_US: u64 = 600_000_000;

pub struct LatencyStats {
    inner: Mutex<Histogram<u64>>,
    failures: Mutex<u64>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct LatencySummary {
    pub samples: u64,
    pub failures: u64,
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
}

impl LatencyStats {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, MAX_TRACKABLE_US, 3)
            .expect("valid histogram bounds");
        Self { inner: Mutex::new(histogram), failures: Mutex::new(0) }
    }

    /// Record one predictor call. Values past the upper bound are saturated.
    pub fn record(&self, d: Duration, succeeded: bool) {
        let us = (d.as_micros().min(u128::from(MAX_TRACKABLE_US)) as u64).max(1);
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us);
        }
        if !succeeded {
            if let Ok(mut f) = self.failures.lock() {
                *f += 1;
            }
        }
    }

    pub fn summary(&self) -> LatencySummary {
        let failures = self.failures.lock().map(|f| *f).unwrap_or(0);
        let Ok(h) = self.inner.lock() else {
            return LatencySummary { samples: 0, failures, p50_us: None, p95_us: None, p99_us: None };
        };
        if h.len() == 0 {
            return LatencySummary { samples: 0, failures, p50_us: None, p95_us: None, p99_us: None };
        }
        LatencySummary {
            samples: h.len(),
            failures,
            p50_us: Some(h.value_at_quantile(0.5)),
            p95_us: Some(h.value_at_quantile(0.95)),
            p99_us: Some(h.value_at_quantile(0.99)),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let stats = LatencyStats::new();
        let s = stats.summary();
        assert_eq!(s.samples, 0);
        assert!(s.p50_us.is_none());
    }

    #[test]
    fn records_samples_and_failures() {
        let stats = LatencyStats::new();
        stats.record(Duration::from_millis(20), true);
        stats.record(Duration::from_millis(40), false);
        let s = stats.summary();
        assert_eq!(s.samples, 2);
        assert_eq!(s.failures, 1);
        assert!(s.p99_us.unwrap() >= 39_000);
    }
}
