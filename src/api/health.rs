//! Shared refresh health for the /health endpoint.
//! Updated by the refresh orchestrator after every cycle.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Default)]
pub struct HealthState {
    /// Unix millis of the last completed refresh (0 = never).
    last_refresh_at_ms: AtomicI64,
    refresh_count: AtomicU64,
    /// True while the served list comes from the synthetic fallback.
    using_fallback: AtomicBool,
    /// Per-event predictor failures in the last cycle.
    last_forecast_errors: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub refresh_count: u64,
    pub using_fallback: bool,
    pub last_forecast_errors: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_refresh(&self, at_ms: i64, using_fallback: bool, forecast_errors: usize) {
        self.last_refresh_at_ms.store(at_ms, Ordering::Relaxed);
        self.refresh_count.fetch_add(1, Ordering::Relaxed);
        self.using_fallback.store(using_fallback, Ordering::Relaxed);
        self.last_forecast_errors.store(forecast_errors as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last = self.last_refresh_at_ms.load(Ordering::Relaxed);
        HealthSnapshot {
            last_refresh_at: (last != 0).then(|| DateTime::from_timestamp_millis(last)).flatten(),
            refresh_count: self.refresh_count.load(Ordering::Relaxed),
            using_fallback: self.using_fallback.load(Ordering::Relaxed),
            last_forecast_errors: self.last_forecast_errors.load(Ordering::Relaxed),
        }
    }
}
