//! Backend dispatch.
//!
//! # Data Flow
//! ```text
//! InferenceRequest
//!     → dispatcher.rs (select ready backend)
//!     → circuit breaker (fail fast when open)
//!     → retry queue (queued backends only)
//!     → backend.rs adapter (bounded by the backend timeout)
//!     → stats.rs (aggregate counters)
//! ```

pub mod backend;
pub mod dispatcher;
pub mod simulated;
pub mod stats;

pub use backend::{AdapterError, AdapterReply, Backend, BackendAdapter, InferenceRequest};
pub use dispatcher::{DispatchError, DispatchReply, Dispatcher};
pub use stats::{DispatcherStats, RequestStats};
