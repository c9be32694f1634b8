//! Backend identities and the adapter seam.
//!
//! # Responsibilities
//! - Name the inference backends (breaker keys)
//! - Define the capability every backend adapter exposes
//!
//! # Design Decisions
//! - Adapters are opaque: the dispatcher never inspects payloads or replies
//! - `send_request` returns a `'static` boxed future so calls can be retried
//!   from queue tasks

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// An inference backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// On-device model.
    Local,
    /// Hosted model.
    Cloud,
    /// Vision model.
    Vision,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::Local, Backend::Cloud, Backend::Vision];

    /// Circuit breaker key for this backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Local => "local",
            Backend::Cloud => "cloud",
            Backend::Vision => "vision",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Backend::Local),
            "cloud" => Ok(Backend::Cloud),
            "vision" => Ok(Backend::Vision),
            other => Err(AdapterError::new(format!("Unknown backend '{}'", other))),
        }
    }
}

/// A unit of work for a backend. The payload is passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Backend to use; the dispatcher chooses when unset.
    pub backend: Option<Backend>,
    /// Adapter-specific request body.
    pub payload: Value,
    /// Queue priority (higher runs first).
    pub priority: i32,
}

impl InferenceRequest {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    pub fn on(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A successful backend response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterReply {
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
}

impl AdapterReply {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Value::Null,
        }
    }
}

/// A failed backend call. Only the message is meaningful to the dispatch layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AdapterError {
    pub message: String,
}

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error produced when a call exceeds its per-backend timeout.
    pub fn timeout(after: Duration) -> Self {
        Self::new(format!("Request timeout after {}ms", after.as_millis()))
    }
}

/// Capability exposed by every backend adapter.
pub trait BackendAdapter: Send + Sync {
    /// Human-readable adapter name for logs.
    fn name(&self) -> &str;

    /// Whether the adapter can currently accept requests.
    fn is_ready(&self) -> bool;

    /// Send one request. Called once per attempt.
    fn send_request(&self, request: &InferenceRequest) -> BoxFuture<'static, Result<AdapterReply, AdapterError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::retries::is_retryable;

    #[test]
    fn test_backend_names() {
        assert_eq!(Backend::Local.to_string(), "local");
        assert_eq!("Vision".parse::<Backend>().unwrap(), Backend::Vision);
        assert!("gpu".parse::<Backend>().is_err());
        assert_eq!(serde_json::to_string(&Backend::Cloud).unwrap(), "\"cloud\"");
    }

    #[test]
    fn test_timeout_error_is_retryable() {
        let err = AdapterError::timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Request timeout after 1500ms");
        assert!(is_retryable(&err.to_string()));
    }

    #[test]
    fn test_request_builder() {
        let req = InferenceRequest::new(serde_json::json!({"prompt": "hi"}))
            .on(Backend::Cloud)
            .with_priority(3);
        assert_eq!(req.backend, Some(Backend::Cloud));
        assert_eq!(req.priority, 3);
        assert_eq!(req.payload["prompt"], "hi");
    }
}
