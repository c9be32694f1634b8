use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::dispatch::DispatcherStats;
use crate::health::HealthReport;
use crate::resilience::{BreakerHealth, QueueStats};

#[derive(Serialize)]
pub struct ResetSummary {
    pub reset: usize,
}

#[derive(Serialize)]
pub struct ClearSummary {
    pub cleared: usize,
}

pub async fn get_health(State(state): State<AdminState>) -> Json<HealthReport> {
    Json(state.dispatcher.get_health())
}

pub async fn get_stats(State(state): State<AdminState>) -> Json<DispatcherStats> {
    Json(state.dispatcher.get_stats())
}

pub async fn reset_stats(State(state): State<AdminState>) -> Json<DispatcherStats> {
    state.dispatcher.reset_stats();
    Json(state.dispatcher.get_stats())
}

pub async fn get_circuits(State(state): State<AdminState>) -> Json<BTreeMap<String, BreakerHealth>> {
    Json(state.dispatcher.registry().breaker().get_all_status())
}

pub async fn reset_circuit(State(state): State<AdminState>, Path(key): Path<String>) -> Json<BreakerHealth> {
    let breaker = state.dispatcher.registry().breaker();
    breaker.reset(&key);
    Json(breaker.get_health(&key))
}

pub async fn open_circuit(State(state): State<AdminState>, Path(key): Path<String>) -> Json<BreakerHealth> {
    let breaker = state.dispatcher.registry().breaker();
    breaker.force_open(&key);
    Json(breaker.get_health(&key))
}

pub async fn close_circuit(State(state): State<AdminState>, Path(key): Path<String>) -> Json<BreakerHealth> {
    let breaker = state.dispatcher.registry().breaker();
    breaker.force_close(&key);
    Json(breaker.get_health(&key))
}

pub async fn reset_all_circuits(State(state): State<AdminState>) -> Json<ResetSummary> {
    let breaker = state.dispatcher.registry().breaker();
    breaker.reset_all();
    Json(ResetSummary { reset: breaker.len() })
}

pub async fn pause_queue(State(state): State<AdminState>) -> Json<QueueStats> {
    let queue = state.dispatcher.registry().queue();
    queue.pause();
    Json(queue.get_stats())
}

pub async fn resume_queue(State(state): State<AdminState>) -> Json<QueueStats> {
    let queue = state.dispatcher.registry().queue();
    queue.resume();
    Json(queue.get_stats())
}

pub async fn clear_queue(State(state): State<AdminState>) -> Json<ClearSummary> {
    let cleared = state.dispatcher.registry().queue().clear();
    Json(ClearSummary { cleared })
}
