//! Health reporting subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher statistics
//!     → report.rs (score, status, textual rendering)
//!     → monitor.rs (periodic log, score gauge, idle breaker eviction)
//! ```
//!
//! # Design Decisions
//! - Health is derived from the success rate only; it never feeds back into
//!   backend selection
//! - An empty history reports healthy

pub mod monitor;
pub mod report;

pub use monitor::HealthMonitor;
pub use report::{health_score, HealthReport, HealthStatus};
