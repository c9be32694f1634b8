//! Request dispatcher.
//!
//! # Responsibilities
//! - Select a ready backend for each request
//! - Run the call through the backend's circuit breaker and, where
//!   configured, the shared retry queue
//! - Impose the per-backend call timeout
//! - Keep aggregate counters and derive statistics and health
//!
//! # Design Decisions
//! - An open circuit fails fast before anything is queued
//! - The breaker only sees the terminal outcome of a queued call, never
//!   individual retried attempts
//! - Backend settings live in an `ArcSwap` so reloads apply to the next request

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::DispatchConfig;
use crate::dispatch::backend::{AdapterError, AdapterReply, Backend, BackendAdapter, InferenceRequest};
use crate::dispatch::stats::{DispatcherStats, RequestCounters};
use crate::health::HealthReport;
use crate::observability::metrics;
use crate::resilience::{
    CircuitError, CircuitOpenError, EnqueueOptions, QueueFullError, ResilienceRegistry, TaskFailure,
};

/// Why a dispatch did not produce a reply.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The backend's circuit is open; honor `retry_after`.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// The retry queue is at capacity.
    #[error(transparent)]
    QueueFull(#[from] QueueFullError),

    /// A queued call failed terminally (retries exhausted or non-retryable).
    #[error(transparent)]
    TaskFailed(#[from] TaskFailure),

    /// An unqueued call failed.
    #[error(transparent)]
    Backend(#[from] AdapterError),

    /// No registered backend is ready.
    #[error("{}", no_backend_message(.requested))]
    NoBackendAvailable { requested: Option<Backend> },
}

fn no_backend_message(requested: &Option<Backend>) -> String {
    match requested {
        Some(backend) => format!("Backend '{}' is not available", backend),
        None => "No ready backend available".to_string(),
    }
}

impl DispatchError {
    /// Attempts consumed before the error, when known.
    pub fn attempts(&self) -> u32 {
        match self {
            DispatchError::TaskFailed(failure) => failure.attempts,
            DispatchError::Backend(_) => 1,
            _ => 0,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::CircuitOpen(_) => "circuit_open",
            DispatchError::QueueFull(_) => "queue_full",
            DispatchError::TaskFailed(_) => "task_failed",
            DispatchError::Backend(_) => "backend_error",
            DispatchError::NoBackendAvailable { .. } => "no_backend",
        }
    }
}

/// A successful dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReply {
    pub backend: Backend,
    pub content: String,
    pub metadata: serde_json::Value,
    pub attempts: u32,
    pub duration: Duration,
}

/// Composes the circuit breaker and retry queue around a set of adapters.
pub struct Dispatcher {
    registry: Arc<ResilienceRegistry>,
    adapters: BTreeMap<Backend, Arc<dyn BackendAdapter>>,
    config: ArcSwap<DispatchConfig>,
    counters: RequestCounters,
}

impl Dispatcher {
    pub fn new(registry: Arc<ResilienceRegistry>, config: DispatchConfig) -> Self {
        Self {
            registry,
            adapters: BTreeMap::new(),
            config: ArcSwap::from_pointee(config),
            counters: RequestCounters::new(),
        }
    }

    /// Register the adapter serving `backend`, replacing any previous one.
    pub fn with_adapter(mut self, backend: Backend, adapter: Arc<dyn BackendAdapter>) -> Self {
        tracing::debug!(backend = %backend, adapter = adapter.name(), "Registered backend adapter");
        self.adapters.insert(backend, adapter);
        self
    }

    pub fn registry(&self) -> &Arc<ResilienceRegistry> {
        &self.registry
    }

    /// Push a reloaded configuration into the dispatcher and its registry.
    pub fn apply_config(&self, config: DispatchConfig) {
        self.registry.apply_config(&config);
        self.config.store(Arc::new(config));
    }

    /// Resolve the backend for a request: the requested one if it is ready,
    /// else the first ready backend in preference order.
    pub fn select_backend(
        &self,
        requested: Option<Backend>,
    ) -> Result<(Backend, Arc<dyn BackendAdapter>), DispatchError> {
        let ready = |backend: &Backend| {
            self.adapters
                .get(backend)
                .filter(|adapter| adapter.is_ready())
                .map(|adapter| (*backend, Arc::clone(adapter)))
        };

        let selected = match requested {
            Some(backend) => ready(&backend),
            None => self.config.load().dispatcher.preference.iter().find_map(ready),
        };

        selected.ok_or(DispatchError::NoBackendAvailable { requested })
    }

    /// Dispatch one request and wait for its terminal outcome.
    pub async fn dispatch(&self, request: InferenceRequest) -> Result<DispatchReply, DispatchError> {
        let (backend, adapter) = match self.select_backend(request.backend) {
            Ok(selected) => selected,
            Err(e) => {
                self.counters.record_request(None);
                self.counters.record_failure();
                tracing::warn!(requested = ?request.backend, "No backend available for request");
                return Err(e);
            }
        };

        self.counters.record_request(Some(backend));
        let started = Instant::now();

        let backend_config = self.config.load().backends.get(backend).clone();
        let priority = request.priority;
        let call = adapter_call(adapter, Arc::new(request), backend_config.timeout());

        let outcome = if backend_config.queued {
            let queue = self.registry.queue();
            self.registry
                .breaker()
                .execute(backend.as_str(), || async move {
                    let handle = queue.enqueue(call, EnqueueOptions::with_priority(priority))?;
                    let success = handle.await?;
                    Ok::<_, DispatchError>((success.data, success.attempts))
                })
                .await
        } else {
            self.registry
                .breaker()
                .execute(backend.as_str(), || async move {
                    let reply = call().await?;
                    Ok::<_, DispatchError>((reply, 1))
                })
                .await
        };

        let duration = started.elapsed();
        let outcome = outcome.map_err(|e| match e {
            CircuitError::Open(open) => DispatchError::CircuitOpen(open),
            CircuitError::Operation(inner) => inner,
        });

        match outcome {
            Ok((reply, attempts)) => {
                self.counters.record_success(duration);
                metrics::record_dispatch(backend.as_str(), "success", duration);
                tracing::debug!(
                    backend = %backend,
                    attempts,
                    duration_ms = duration.as_millis() as u64,
                    "Request dispatched"
                );
                Ok(DispatchReply {
                    backend,
                    content: reply.content,
                    metadata: reply.metadata,
                    attempts,
                    duration,
                })
            }
            Err(e) => {
                self.counters.record_failure();
                metrics::record_dispatch(backend.as_str(), e.kind(), duration);
                tracing::warn!(
                    backend = %backend,
                    error = %e,
                    attempts = e.attempts(),
                    "Request failed"
                );
                Err(e)
            }
        }
    }

    pub fn get_stats(&self) -> DispatcherStats {
        DispatcherStats {
            requests: self.counters.snapshot(),
            queue: self.registry.queue().get_stats(),
            circuit_breaker: self.registry.breaker().get_all_status(),
            uptime_ms: self.counters.uptime().as_millis() as u64,
        }
    }

    pub fn get_health(&self) -> HealthReport {
        HealthReport::from_stats(self.get_stats())
    }

    /// Emit the textual health report.
    pub fn log_health(&self) {
        self.get_health().log();
    }

    /// Zero the request counters and restart the uptime clock.
    pub fn reset_stats(&self) {
        self.counters.reset();
        tracing::info!("Dispatcher statistics reset");
    }
}

/// Build the per-attempt call: one adapter request bounded by `timeout`.
fn adapter_call(
    adapter: Arc<dyn BackendAdapter>,
    request: Arc<InferenceRequest>,
    timeout: Duration,
) -> impl Fn() -> BoxFuture<'static, Result<AdapterReply, AdapterError>> + Send + 'static {
    move || {
        let pending = adapter.send_request(&request);
        Box::pin(async move {
            match tokio::time::timeout(timeout, pending).await {
                Ok(result) => result,
                Err(_) => Err(AdapterError::timeout(timeout)),
            }
        })
    }
}
