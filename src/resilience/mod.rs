//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream connect:
//!     → connect timeout
//!     → On failure: backoff.rs (exponential delay with jitter) → retry
//! ```
//!
//! # Design Decisions
//! - Every upstream connect has a deadline
//! - Jitter keeps reconnecting sessions from synchronising

pub mod backoff;

pub use backoff::{calculate_backoff, Backoff};
