//! Concurrency shaping under sustained load.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};
use serde_json::json;

use resilient_dispatch::dispatch::{AdapterError, AdapterReply, Backend, BackendAdapter, Dispatcher, InferenceRequest};
use resilient_dispatch::resilience::ResilienceRegistry;

mod common;

/// Tracks how many calls are in flight at once.
#[derive(Default)]
struct GaugedBackend {
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    failed_once: Mutex<HashSet<u64>>,
}

impl BackendAdapter for GaugedBackend {
    fn name(&self) -> &str {
        "gauged"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn send_request(&self, request: &InferenceRequest) -> BoxFuture<'static, Result<AdapterReply, AdapterError>> {
        // Every seventh request hits one transient error and is retried.
        let n = request.payload["n"].as_u64().unwrap_or(0);
        let fail = n % 7 == 6 && self.failed_once.lock().unwrap().insert(n);
        let in_flight = Arc::clone(&self.in_flight);
        let peak = Arc::clone(&self.peak);
        Box::pin(async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            if fail {
                Err(AdapterError::new("502 Bad Gateway"))
            } else {
                Ok(AdapterReply::new("ok"))
            }
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_holds_under_load() {
    let mut config = common::test_config();
    config.queue.max_concurrent = 3;
    config.queue.max_queue_size = 500;
    config.circuit_breaker.failure_threshold = 100;

    let backend = Arc::new(GaugedBackend::default());
    let registry = ResilienceRegistry::new(&config);
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), config).with_adapter(Backend::Local, backend.clone()));

    let requests = (0..200).map(|i| {
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            dispatcher
                .dispatch(InferenceRequest::new(json!({ "n": i })).on(Backend::Local).with_priority(i % 4))
                .await
        }
    });
    let results = join_all(requests).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(backend.peak.load(Ordering::SeqCst), 3);

    registry.queue().wait_idle().await;
    let stats = dispatcher.get_stats();
    assert_eq!(stats.requests.total, 200);
    assert_eq!(stats.requests.successful, 200);
    assert_eq!(stats.requests.local, 200);
    assert_eq!(stats.queue.completed, 200);
    assert_eq!(stats.queue.retried, 28);
    assert_eq!(stats.queue.running, 0);
    assert_eq!(stats.queue.utilization, 0.0);
}
