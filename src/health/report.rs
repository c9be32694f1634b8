//! Derived health report.
//!
//! # Scoring
//! ```text
//! penalty      = (100 - success_rate) * 0.5
//! health_score = clamp(100 - penalty, 0, 100)
//!
//!   score > 80        → healthy
//!   50 < score <= 80  → degraded
//!   score <= 50       → unhealthy
//! ```
//! With no requests recorded the score is 100: no evidence is not failure.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::dispatch::stats::{DispatcherStats, RequestStats};
use crate::resilience::{BreakerHealth, QueueStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn from_score(score: f64) -> Self {
        if score > 80.0 {
            HealthStatus::Healthy
        } else if score > 50.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Score in `[0, 100]` from a success percentage.
pub fn health_score(success_rate: f64, total_requests: u64) -> f64 {
    if total_requests == 0 {
        return 100.0;
    }
    let penalty = (100.0 - success_rate) * 0.5;
    (100.0 - penalty).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthChecks {
    pub queue: QueueStats,
    pub circuit_breaker: BTreeMap<String, BreakerHealth>,
    pub requests: RequestStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub total_requests: u64,
    pub uptime_ms: u64,
    pub utilization: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub health_score: f64,
    /// Unix epoch milliseconds.
    pub timestamp: u64,
    pub checks: HealthChecks,
    pub summary: HealthSummary,
}

impl HealthReport {
    pub fn from_stats(stats: DispatcherStats) -> Self {
        let total = stats.requests.total;
        let score = health_score(stats.requests.success_rate_value(), total);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            status: HealthStatus::from_score(score),
            health_score: score,
            timestamp,
            summary: HealthSummary {
                total_requests: total,
                uptime_ms: stats.uptime_ms,
                utilization: stats.queue.utilization,
            },
            checks: HealthChecks {
                queue: stats.queue,
                circuit_breaker: stats.circuit_breaker,
                requests: stats.requests,
            },
        }
    }

    /// Multi-line text rendering used by [`HealthReport::log`].
    pub fn render(&self) -> String {
        let requests = &self.checks.requests;
        let queue = &self.checks.queue;
        let mut out = String::new();

        let _ = writeln!(out, "=== Dispatcher Health ===");
        let _ = writeln!(out, "Status: {} (score {:.1})", self.status.as_str(), self.health_score);
        let _ = writeln!(out, "Uptime: {}s", self.summary.uptime_ms / 1000);
        let _ = writeln!(
            out,
            "Requests: {} total, {} ok, {} failed, success rate {}",
            requests.total, requests.successful, requests.failed, requests.success_rate
        );
        let _ = writeln!(
            out,
            "Backends: local={} cloud={} vision={}, avg {:.0}ms",
            requests.local, requests.cloud, requests.vision, requests.avg_duration_ms
        );
        let _ = writeln!(
            out,
            "Queue: {} running / {} max, {} pending, {:.0}% utilization{}",
            queue.running,
            queue.max_concurrent,
            queue.queued,
            queue.utilization * 100.0,
            if queue.paused { " (paused)" } else { "" }
        );
        if self.checks.circuit_breaker.is_empty() {
            let _ = write!(out, "Circuits: none");
        } else {
            let _ = write!(out, "Circuits:");
            for (key, health) in &self.checks.circuit_breaker {
                let _ = write!(
                    out,
                    "\n  {}: {} (failure rate {}%, {} recent)",
                    key, health.state, health.failure_rate, health.recent_operations
                );
            }
        }
        out
    }

    /// Emit the rendered report through `tracing`.
    pub fn log(&self) {
        tracing::info!(
            status = self.status.as_str(),
            health_score = self.health_score,
            total_requests = self.summary.total_requests,
            "\n{}",
            self.render()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_thresholds() {
        assert_eq!(health_score(70.0, 10), 85.0);
        assert_eq!(HealthStatus::from_score(85.0), HealthStatus::Healthy);

        assert_eq!(health_score(20.0, 10), 60.0);
        assert_eq!(HealthStatus::from_score(60.0), HealthStatus::Degraded);

        assert_eq!(health_score(0.0, 10), 50.0);
        assert_eq!(HealthStatus::from_score(50.0), HealthStatus::Unhealthy);

        assert_eq!(HealthStatus::from_score(80.0), HealthStatus::Degraded);
    }

    #[test]
    fn test_no_requests_is_healthy() {
        assert_eq!(health_score(0.0, 0), 100.0);
        assert_eq!(HealthStatus::from_score(health_score(0.0, 0)), HealthStatus::Healthy);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&HealthStatus::Degraded).unwrap(), "\"degraded\"");
    }
}
