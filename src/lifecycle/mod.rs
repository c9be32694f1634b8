//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → request graceful shutdown
//!
//! Shutdown (shutdown.rs):
//!     Broadcast to background tasks → pause queue → fail pending → wait for in-flight
//! ```
//!
//! # Design Decisions
//! - Shutdown has a deadline: in-flight work is abandoned after the grace period

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
