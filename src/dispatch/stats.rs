//! Aggregate request counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::dispatch::backend::Backend;
use crate::resilience::{BreakerHealth, QueueStats};

/// Process-lifetime request counters; reset only explicitly.
#[derive(Debug)]
pub struct RequestCounters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    total_duration_ms: AtomicU64,
    local: AtomicU64,
    cloud: AtomicU64,
    vision: AtomicU64,
    started_at: Mutex<Instant>,
}

impl RequestCounters {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            local: AtomicU64::new(0),
            cloud: AtomicU64::new(0),
            vision: AtomicU64::new(0),
            started_at: Mutex::new(Instant::now()),
        }
    }

    /// Count a request, optionally attributed to a backend.
    pub fn record_request(&self, backend: Option<Backend>) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let per_backend = match backend {
            Some(Backend::Local) => &self.local,
            Some(Backend::Cloud) => &self.cloud,
            Some(Backend::Vision) => &self.vision,
            None => return,
        };
        per_backend.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, duration: Duration) {
        self.successful.fetch_add(1, Ordering::Relaxed);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub fn reset(&self) {
        for counter in [
            &self.total,
            &self.successful,
            &self.failed,
            &self.total_duration_ms,
            &self.local,
            &self.cloud,
            &self.vision,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn snapshot(&self) -> RequestStats {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        let total_duration_ms = self.total_duration_ms.load(Ordering::Relaxed);

        RequestStats {
            total,
            successful,
            failed: self.failed.load(Ordering::Relaxed),
            local: self.local.load(Ordering::Relaxed),
            cloud: self.cloud.load(Ordering::Relaxed),
            vision: self.vision.load(Ordering::Relaxed),
            success_rate: format_success_rate(successful, total),
            avg_duration_ms: if successful == 0 {
                0.0
            } else {
                total_duration_ms as f64 / successful as f64
            },
        }
    }
}

impl Default for RequestCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Success percentage rounded to two decimals.
pub fn success_rate(successful: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = successful as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

/// `"70.00"` style percentage, or `"0%"` before any request.
pub fn format_success_rate(successful: u64, total: u64) -> String {
    if total == 0 {
        "0%".to_string()
    } else {
        format!("{:.2}", success_rate(successful, total))
    }
}

/// Request section of the dispatcher statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub local: u64,
    pub cloud: u64,
    pub vision: u64,
    pub success_rate: String,
    pub avg_duration_ms: f64,
}

impl RequestStats {
    /// Numeric success rate used for health scoring.
    pub fn success_rate_value(&self) -> f64 {
        success_rate(self.successful, self.total)
    }
}

/// Full statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStats {
    pub requests: RequestStats,
    pub queue: QueueStats,
    pub circuit_breaker: BTreeMap<String, BreakerHealth>,
    pub uptime_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate_format() {
        assert_eq!(format_success_rate(0, 0), "0%");
        assert_eq!(format_success_rate(7, 10), "70.00");
        assert_eq!(format_success_rate(2, 3), "66.67");
        assert_eq!(format_success_rate(10, 10), "100.00");
    }

    #[test]
    fn test_counters_and_reset() {
        let counters = RequestCounters::new();
        counters.record_request(Some(Backend::Local));
        counters.record_request(Some(Backend::Vision));
        counters.record_request(None);
        counters.record_success(Duration::from_millis(100));
        counters.record_success(Duration::from_millis(300));
        counters.record_failure();

        let stats = counters.snapshot();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.local, 1);
        assert_eq!(stats.cloud, 0);
        assert_eq!(stats.vision, 1);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.avg_duration_ms, 200.0);

        counters.reset();
        let stats = counters.snapshot();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.avg_duration_ms, 0.0);
        assert_eq!(stats.success_rate, "0%");
    }
}
