//! Dispatcher statistics, health and backend selection.

use std::time::Duration;

use serde_json::json;

use resilient_dispatch::dispatch::{AdapterError, AdapterReply, Backend, DispatchError, InferenceRequest};
use resilient_dispatch::health::HealthStatus;
use resilient_dispatch::resilience::CircuitState;

mod common;
use common::ScriptedBackend;

fn request(backend: Backend) -> InferenceRequest {
    InferenceRequest::new(json!({ "prompt": "describe the screen" })).on(backend)
}

#[tokio::test(start_paused = true)]
async fn test_seven_of_ten_is_healthy() {
    let mut config = common::test_config();
    config.circuit_breaker.failure_threshold = 100;
    let vision = ScriptedBackend::new("vision", |n| {
        if n < 7 {
            Ok(AdapterReply::new("ok"))
        } else {
            Err(AdapterError::new("Invalid input"))
        }
    });
    let dispatcher = common::dispatcher(config, vec![(Backend::Vision, vision)]);

    for _ in 0..10 {
        let _ = dispatcher.dispatch(request(Backend::Vision)).await;
    }

    let stats = dispatcher.get_stats();
    assert_eq!(stats.requests.total, 10);
    assert_eq!(stats.requests.successful, 7);
    assert_eq!(stats.requests.failed, 3);
    assert_eq!(stats.requests.vision, 10);
    assert_eq!(stats.requests.success_rate, "70.00");

    let health = dispatcher.get_health();
    assert_eq!(health.health_score, 85.0);
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.summary.total_requests, 10);
}

#[tokio::test(start_paused = true)]
async fn test_two_of_ten_is_degraded() {
    let mut config = common::test_config();
    config.circuit_breaker.failure_threshold = 100;
    let vision = ScriptedBackend::new("vision", |n| {
        if n < 2 {
            Ok(AdapterReply::new("ok"))
        } else {
            Err(AdapterError::new("Invalid input"))
        }
    });
    let dispatcher = common::dispatcher(config, vec![(Backend::Vision, vision)]);

    for _ in 0..10 {
        let _ = dispatcher.dispatch(request(Backend::Vision)).await;
    }

    let health = dispatcher.get_health();
    assert_eq!(health.checks.requests.success_rate, "20.00");
    assert_eq!(health.health_score, 60.0);
    assert_eq!(health.status, HealthStatus::Degraded);
}

#[tokio::test]
async fn test_no_requests_is_healthy() {
    let dispatcher = common::dispatcher(common::test_config(), vec![]);

    let stats = dispatcher.get_stats();
    assert_eq!(stats.requests.success_rate, "0%");
    assert_eq!(stats.requests.avg_duration_ms, 0.0);

    let health = dispatcher.get_health();
    assert_eq!(health.health_score, 100.0);
    assert_eq!(health.status, HealthStatus::Healthy);
}

#[tokio::test(start_paused = true)]
async fn test_avg_duration_counts_successes_only() {
    let mut config = common::test_config();
    config.backends.vision.timeout_ms = 1_000;
    let vision = ScriptedBackend::with_latency("vision", Duration::from_millis(200), |n| {
        if n == 0 {
            Ok(AdapterReply::new("ok"))
        } else {
            Err(AdapterError::new("Invalid input"))
        }
    });
    let dispatcher = common::dispatcher(config, vec![(Backend::Vision, vision)]);

    dispatcher.dispatch(request(Backend::Vision)).await.unwrap();
    dispatcher.dispatch(request(Backend::Vision)).await.unwrap_err();

    let stats = dispatcher.get_stats();
    assert_eq!(stats.requests.successful, 1);
    assert!((200.0..=201.0).contains(&stats.requests.avg_duration_ms));
}

#[tokio::test]
async fn test_preference_skips_unready_backend() {
    let local = ScriptedBackend::healthy("local");
    let cloud = ScriptedBackend::healthy("cloud");
    local.set_ready(false);
    let dispatcher = common::dispatcher(
        common::test_config(),
        vec![(Backend::Local, local.clone()), (Backend::Cloud, cloud.clone())],
    );

    let reply = dispatcher
        .dispatch(InferenceRequest::new(json!({ "prompt": "hi" })))
        .await
        .unwrap();

    assert_eq!(reply.backend, Backend::Cloud);
    assert_eq!(reply.content, "cloud reply 0");
    assert_eq!(reply.attempts, 1);
    assert_eq!(local.calls(), 0);

    let stats = dispatcher.get_stats();
    assert_eq!(stats.requests.local, 0);
    assert_eq!(stats.requests.cloud, 1);
}

#[tokio::test]
async fn test_no_backend_available() {
    let local = ScriptedBackend::healthy("local");
    local.set_ready(false);
    let dispatcher = common::dispatcher(common::test_config(), vec![(Backend::Local, local)]);

    let err = dispatcher
        .dispatch(InferenceRequest::new(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NoBackendAvailable { requested: None }));

    let err = dispatcher.dispatch(request(Backend::Vision)).await.unwrap_err();
    assert_eq!(err.to_string(), "Backend 'vision' is not available");

    let stats = dispatcher.get_stats();
    assert_eq!(stats.requests.total, 2);
    assert_eq!(stats.requests.failed, 2);
    assert!(stats.circuit_breaker.is_empty());
}

#[tokio::test]
async fn test_reset_stats() {
    let cloud = ScriptedBackend::healthy("cloud");
    let dispatcher = common::dispatcher(common::test_config(), vec![(Backend::Cloud, cloud)]);

    dispatcher.dispatch(request(Backend::Cloud)).await.unwrap();
    assert_eq!(dispatcher.get_stats().requests.total, 1);

    dispatcher.reset_stats();
    let stats = dispatcher.get_stats();
    assert_eq!(stats.requests.total, 0);
    assert_eq!(stats.requests.cloud, 0);
    assert_eq!(stats.requests.success_rate, "0%");
    // Breaker history is not part of the request counters.
    assert_eq!(stats.circuit_breaker["cloud"].state, CircuitState::Closed);
    assert_eq!(stats.circuit_breaker["cloud"].recent_operations, 1);
}

#[tokio::test]
async fn test_apply_config_changes_preference() {
    let local = ScriptedBackend::healthy("local");
    let cloud = ScriptedBackend::healthy("cloud");
    let dispatcher = common::dispatcher(
        common::test_config(),
        vec![(Backend::Local, local), (Backend::Cloud, cloud)],
    );

    let reply = dispatcher.dispatch(InferenceRequest::new(json!({}))).await.unwrap();
    assert_eq!(reply.backend, Backend::Local);

    let mut config = common::test_config();
    config.dispatcher.preference = vec![Backend::Cloud, Backend::Local];
    config.queue.max_concurrent = 5;
    dispatcher.apply_config(config);

    let reply = dispatcher.dispatch(InferenceRequest::new(json!({}))).await.unwrap();
    assert_eq!(reply.backend, Backend::Cloud);
    assert_eq!(dispatcher.get_stats().queue.max_concurrent, 5);
}

#[tokio::test]
async fn test_health_report_serializes() {
    let cloud = ScriptedBackend::healthy("cloud");
    let dispatcher = common::dispatcher(common::test_config(), vec![(Backend::Cloud, cloud)]);
    dispatcher.dispatch(request(Backend::Cloud)).await.unwrap();

    let value = serde_json::to_value(dispatcher.get_health()).unwrap();
    assert_eq!(value["status"], "healthy");
    assert_eq!(value["checks"]["circuit_breaker"]["cloud"]["state"], "CLOSED");
    assert_eq!(value["checks"]["requests"]["success_rate"], "100.00");
    assert_eq!(value["summary"]["total_requests"], 1);

    let text = dispatcher.get_health().render();
    assert!(text.contains("Status: healthy"));
    assert!(text.contains("cloud: CLOSED"));
    dispatcher.log_health();
}
