//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the dispatcher.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::Backend;

/// Root configuration for the dispatch layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-backend circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry queue settings.
    pub queue: QueueConfig,

    /// Settings for each inference backend.
    pub backends: BackendsConfig,

    /// Backend selection policy.
    pub dispatcher: DispatcherConfig,

    /// Periodic health reporting.
    pub health: HealthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure rate (percent) at which a closed circuit opens.
    pub failure_threshold: u32,

    /// Successes required in half-open state before closing.
    pub success_threshold: u32,

    /// Cooldown before an open circuit admits a probe, in milliseconds.
    pub half_open_time_ms: u64,

    /// Sliding window for failure-rate computation, in milliseconds.
    pub monitoring_window_ms: u64,

    /// Minimum in-window samples before the failure rate is trusted.
    pub min_samples: usize,

    /// Drop closed, inactive breakers after this many seconds (unset = never).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_eviction_secs: Option<u64>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 50,
            success_threshold: 2,
            half_open_time_ms: 30_000,
            monitoring_window_ms: 60_000,
            min_samples: 5,
            idle_eviction_secs: None,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn half_open_time(&self) -> Duration {
        Duration::from_millis(self.half_open_time_ms)
    }

    pub fn monitoring_window(&self) -> Duration {
        Duration::from_millis(self.monitoring_window_ms)
    }
}

/// Request queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum tasks executing at once.
    pub max_concurrent: usize,

    /// Base delay for exponential backoff in milliseconds.
    pub retry_delay_ms: u64,

    /// Retries allowed after the first attempt.
    pub max_retries: u32,

    /// Maximum pending (not yet running) tasks.
    pub max_queue_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            retry_delay_ms: 1000,
            max_retries: 3,
            max_queue_size: 100,
        }
    }
}

impl QueueConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Settings for all three backends.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BackendsConfig {
    pub local: BackendConfig,
    pub cloud: BackendConfig,
    pub vision: BackendConfig,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            local: BackendConfig::default(),
            cloud: BackendConfig::default(),
            vision: BackendConfig {
                queued: false,
                ..BackendConfig::default()
            },
        }
    }
}

impl BackendsConfig {
    /// Settings for the given backend.
    pub fn get(&self, backend: Backend) -> &BackendConfig {
        match backend {
            Backend::Local => &self.local,
            Backend::Cloud => &self.cloud,
            Backend::Vision => &self.vision,
        }
    }
}

/// Per-backend dispatch settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Route calls through the retry queue (concurrency shaping).
    pub queued: bool,

    /// Per-call timeout imposed on the adapter, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            queued: true,
            timeout_ms: 60_000,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Backend selection policy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Order in which ready backends are tried when none is requested.
    pub preference: Vec<Backend>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            preference: vec![Backend::Local, Backend::Cloud],
        }
    }
}

/// Health reporting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Enable the periodic health monitor.
    pub enabled: bool,

    /// Seconds between health log reports.
    pub log_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_interval_secs: 60,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

/// Placeholder key rejected by validation when the admin API is enabled.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
