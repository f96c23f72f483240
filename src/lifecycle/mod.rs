//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Stop accepting → Release throttled transfers → Drain sessions → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, release the throttler, drain, close
//! - Shutdown has timeout: remaining sessions are abandoned after the deadline

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_termination;
