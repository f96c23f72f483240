//! Global bandwidth throttling.
//!
//! # Data Flow
//! ```text
//! ThrottledStream::poll_read / poll_write
//!     → scheduler.rs (enqueue pending request on its rule set, park on a oneshot)
//!     → scheduler tick (every burst interval)
//!         → plan.rs (split budget × Δt across peers, then across each peer's requests)
//!         → grant allowances, wake callers
//!     → stream.rs (transfer at most the allowance, re-enqueue if more is wanted)
//! ```
//!
//! # Design Decisions
//! - Fairness unit is the remote peer, not the request: many small concurrent
//!   operations from one peer do not starve another peer
//! - A budget of zero bypasses the scheduler entirely
//! - Fractional allowances carry over between ticks so tiny budgets still progress
//! - Shutdown releases every parked caller; later transfers run unthrottled

pub mod plan;
pub mod scheduler;
pub mod stream;

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use thiserror::Error;

pub use plan::{plan_tick, Allowance, RequestView};
pub use scheduler::Throttler;
pub use stream::ThrottledStream;

/// Index of a rule set inside a [`Throttler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleSetId(pub usize);

impl RuleSetId {
    /// Matches no rule set; streams wrapped with it are never throttled.
    pub const NONE: RuleSetId = RuleSetId(usize::MAX);
}

impl fmt::Display for RuleSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote peer identity used to group requests for fairness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeerId {
    Ip(IpAddr),
    Named(Arc<str>),
}

impl From<IpAddr> for PeerId {
    fn from(ip: IpAddr) -> Self {
        PeerId::Ip(ip)
    }
}

impl From<&str> for PeerId {
    fn from(name: &str) -> Self {
        PeerId::Named(Arc::from(name))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerId::Ip(ip) => write!(f, "{}", ip),
            PeerId::Named(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Error)]
pub enum ThrottleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cancelled while waiting for an allowance.
    #[error("throttled transfer cancelled after {transferred} bytes")]
    Cancelled { transferred: usize },

    #[error("unknown rule set {0}")]
    UnknownRuleSet(RuleSetId),
}
