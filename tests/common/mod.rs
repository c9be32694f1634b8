//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use resilient_dispatch::config::DispatchConfig;
use resilient_dispatch::dispatch::{AdapterError, AdapterReply, Backend, BackendAdapter, Dispatcher, InferenceRequest};
use resilient_dispatch::resilience::ResilienceRegistry;

type Script = dyn Fn(u32) -> Result<AdapterReply, AdapterError> + Send + Sync;

/// Backend whose reply to the n-th call (0-based) is decided by a closure.
pub struct ScriptedBackend {
    name: String,
    latency: Duration,
    ready: AtomicBool,
    calls: AtomicU32,
    script: Arc<Script>,
}

impl ScriptedBackend {
    pub fn new<F>(name: &str, script: F) -> Arc<Self>
    where
        F: Fn(u32) -> Result<AdapterReply, AdapterError> + Send + Sync + 'static,
    {
        Self::with_latency(name, Duration::ZERO, script)
    }

    pub fn with_latency<F>(name: &str, latency: Duration, script: F) -> Arc<Self>
    where
        F: Fn(u32) -> Result<AdapterReply, AdapterError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.to_string(),
            latency,
            ready: AtomicBool::new(true),
            calls: AtomicU32::new(0),
            script: Arc::new(script),
        })
    }

    /// Always succeeds.
    pub fn healthy(name: &str) -> Arc<Self> {
        let reply_name = name.to_string();
        Self::new(name, move |n| Ok(AdapterReply::new(format!("{} reply {}", reply_name, n))))
    }

    /// Always fails with `message`.
    pub fn failing(name: &str, message: &'static str) -> Arc<Self> {
        Self::new(name, move |_| Err(AdapterError::new(message)))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

impl BackendAdapter for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn send_request(&self, _request: &InferenceRequest) -> BoxFuture<'static, Result<AdapterReply, AdapterError>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let script = Arc::clone(&self.script);
        let latency = self.latency;
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            script(n)
        })
    }
}

/// Config with short retry delays so tests spend little (virtual) time backing off.
pub fn test_config() -> DispatchConfig {
    let mut config = DispatchConfig::default();
    config.queue.retry_delay_ms = 10;
    config.health.enabled = false;
    config
}

pub fn dispatcher(config: DispatchConfig, adapters: Vec<(Backend, Arc<ScriptedBackend>)>) -> Arc<Dispatcher> {
    let registry = ResilienceRegistry::new(&config);
    let mut dispatcher = Dispatcher::new(registry, config);
    for (backend, adapter) in adapters {
        dispatcher = dispatcher.with_adapter(backend, adapter);
    }
    Arc::new(dispatcher)
}
