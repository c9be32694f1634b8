//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to backend:
//!     → circuit_breaker.rs (fail fast if the backend's circuit is open)
//!     → queue.rs (bounded, prioritized, concurrency-limited execution)
//!         → retries.rs (is the failure transient?)
//!         → backoff.rs (how long to wait before the next attempt)
//!     → circuit_breaker.rs (record the terminal outcome)
//! ```
//!
//! # Design Decisions
//! - Breaker and queue are orthogonal; only terminal outcomes reach the breaker
//! - Retries only for failures recognised as transient
//! - Both live in one `ResilienceRegistry` that is injected, never global

pub mod backoff;
pub mod circuit_breaker;
pub mod queue;
pub mod registry;
pub mod retries;

pub use circuit_breaker::{
    BreakerHealth, CircuitBreaker, CircuitError, CircuitOpenError, CircuitState, CIRCUIT_OPEN_CODE,
};
pub use queue::{
    EnqueueOptions, QueueFullError, QueueStats, RequestQueue, TaskFailure, TaskHandle,
    TaskResult, TaskSuccess,
};
pub use registry::ResilienceRegistry;
