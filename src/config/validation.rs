//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds, windows, limits)
//! - Reject duplicate or empty backend preferences
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DispatchConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::{DispatchConfig, PLACEHOLDER_API_KEY};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be between {min} and {max} (got {value})")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
        value: u64,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("dispatcher.preference must list at least one backend")]
    EmptyPreference,

    #[error("dispatcher.preference lists '{0}' more than once")]
    DuplicatePreference(String),

    #[error("admin.api_key must be changed when the admin API is enabled")]
    PlaceholderApiKey,
}

/// Validate a configuration, collecting every violation.
pub fn validate_config(config: &DispatchConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let cb = &config.circuit_breaker;
    if !(1..=100).contains(&cb.failure_threshold) {
        errors.push(ValidationError::OutOfRange {
            field: "circuit_breaker.failure_threshold",
            min: 1,
            max: 100,
            value: cb.failure_threshold as u64,
        });
    }
    non_zero(&mut errors, "circuit_breaker.success_threshold", cb.success_threshold as u64);
    non_zero(&mut errors, "circuit_breaker.half_open_time_ms", cb.half_open_time_ms);
    non_zero(&mut errors, "circuit_breaker.monitoring_window_ms", cb.monitoring_window_ms);
    non_zero(&mut errors, "circuit_breaker.min_samples", cb.min_samples as u64);
    if let Some(secs) = cb.idle_eviction_secs {
        non_zero(&mut errors, "circuit_breaker.idle_eviction_secs", secs);
    }

    let queue = &config.queue;
    non_zero(&mut errors, "queue.max_concurrent", queue.max_concurrent as u64);
    non_zero(&mut errors, "queue.max_queue_size", queue.max_queue_size as u64);

    non_zero(&mut errors, "backends.local.timeout_ms", config.backends.local.timeout_ms);
    non_zero(&mut errors, "backends.cloud.timeout_ms", config.backends.cloud.timeout_ms);
    non_zero(&mut errors, "backends.vision.timeout_ms", config.backends.vision.timeout_ms);

    if config.dispatcher.preference.is_empty() {
        errors.push(ValidationError::EmptyPreference);
    }
    let mut seen = HashSet::new();
    for backend in &config.dispatcher.preference {
        if !seen.insert(*backend) {
            errors.push(ValidationError::DuplicatePreference(backend.to_string()));
        }
    }

    if config.health.enabled {
        non_zero(&mut errors, "health.log_interval_secs", config.health.log_interval_secs);
    }

    if config.admin.enabled && (config.admin.api_key.is_empty() || config.admin.api_key == PLACEHOLDER_API_KEY) {
        errors.push(ValidationError::PlaceholderApiKey);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn non_zero(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::Zero { field });
    }
}
