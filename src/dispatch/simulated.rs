//! In-process backend with configurable latency and failure rate.
//!
//! Stands in for a real model server when running the binary locally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::json;

use crate::dispatch::backend::{AdapterError, AdapterReply, BackendAdapter, InferenceRequest};

pub struct SimulatedBackend {
    name: String,
    latency: Duration,
    jitter: Duration,
    failure_rate: f64,
    failure_message: String,
    ready: AtomicBool,
}

impl SimulatedBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency: Duration::from_millis(50),
            jitter: Duration::ZERO,
            failure_rate: 0.0,
            failure_message: "503 Service Unavailable".to_string(),
            ready: AtomicBool::new(true),
        }
    }

    pub fn latency(mut self, latency: Duration, jitter: Duration) -> Self {
        self.latency = latency;
        self.jitter = jitter;
        self
    }

    /// Fraction of calls (0.0-1.0) that fail with `message`.
    pub fn failing(mut self, rate: f64, message: impl Into<String>) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self.failure_message = message.into();
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }
}

impl BackendAdapter for SimulatedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn send_request(&self, request: &InferenceRequest) -> BoxFuture<'static, Result<AdapterReply, AdapterError>> {
        let jitter_ms = self.jitter.as_millis() as u64;
        let delay = self.latency + Duration::from_millis(fastrand::u64(0..=jitter_ms));
        let fail = fastrand::f64() < self.failure_rate;
        let failure_message = self.failure_message.clone();
        let name = self.name.clone();
        let payload = request.payload.clone();

        Box::pin(async move {
            tokio::time::sleep(delay).await;
            if fail {
                return Err(AdapterError::new(failure_message));
            }
            Ok(AdapterReply {
                content: format!("{} handled request", name),
                metadata: json!({
                    "backend": name,
                    "latency_ms": delay.as_millis() as u64,
                    "echo": payload,
                }),
            })
        })
    }
}
