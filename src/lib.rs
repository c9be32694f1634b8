//! Resilient multi-backend inference dispatch.
//!
//! Per-backend circuit breakers, a bounded priority retry queue, and a
//! dispatcher that composes both and reports aggregate health.

// Core
pub mod config;
pub mod dispatch;
pub mod resilience;

// Surfaces
pub mod admin;
pub mod health;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::DispatchConfig;
pub use dispatch::{Backend, BackendAdapter, DispatchError, Dispatcher, InferenceRequest};
pub use lifecycle::Shutdown;
pub use resilience::{CircuitBreaker, RequestQueue, ResilienceRegistry};
