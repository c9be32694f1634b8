//! Admin HTTP API.
//!
//! # Endpoints
//! ```text
//! GET  /admin/health                 health report
//! GET  /admin/stats                  dispatcher statistics
//! POST /admin/stats/reset            zero request counters
//! GET  /admin/circuits               every breaker snapshot
//! POST /admin/circuits/reset         reset every breaker
//! POST /admin/circuits/{key}/reset   reset one breaker
//! POST /admin/circuits/{key}/open    force a breaker open
//! POST /admin/circuits/{key}/close   force a breaker closed
//! POST /admin/queue/pause            stop starting queued work
//! POST /admin/queue/resume           resume starting queued work
//! POST /admin/queue/clear            fail every pending item
//! ```
//!
//! # Design Decisions
//! - Every route sits behind bearer-token auth
//! - Handlers only read or poke the shared registry; they never dispatch

pub mod auth;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::dispatch::Dispatcher;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub dispatcher: Arc<Dispatcher>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(dispatcher: Arc<Dispatcher>, api_key: &str) -> Self {
        Self {
            dispatcher,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/health", get(get_health))
        .route("/admin/stats", get(get_stats))
        .route("/admin/stats/reset", post(reset_stats))
        .route("/admin/circuits", get(get_circuits))
        .route("/admin/circuits/reset", post(reset_all_circuits))
        .route("/admin/circuits/{key}/reset", post(reset_circuit))
        .route("/admin/circuits/{key}/open", post(open_circuit))
        .route("/admin/circuits/{key}/close", post(close_circuit))
        .route("/admin/queue/pause", post(pause_queue))
        .route("/admin/queue/resume", post(resume_queue))
        .route("/admin/queue/clear", post(clear_queue))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the admin API until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "Admin API starting");

    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}
