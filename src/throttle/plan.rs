//! Per-tick apportioning of a rule set's budget.

use std::collections::HashMap;
use std::time::Duration;

use super::PeerId;

/// What the scheduler knows about one pending request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestView {
    pub peer: PeerId,
    /// Bytes the caller still wants to transfer.
    pub remaining: usize,
    /// Fractional allowance left over from earlier ticks.
    pub carry: f64,
}

/// Grant for one request in one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Allowance {
    /// Transfer up to `bytes` (never more than requested); `carry` is the
    /// fraction to bring to the next tick.
    Bytes { bytes: usize, carry: f64 },
    /// No limit for this request.
    Unlimited,
}

/// Split `bytes_per_second × elapsed` evenly across the distinct peers in
/// `requests`, then evenly across each peer's requests.
///
/// Returns one allowance per request, in input order. A budget of zero, or a
/// peer share that rounds to nothing, yields `Unlimited` so no caller stalls.
pub fn plan_tick(bytes_per_second: u64, elapsed: Duration, requests: &[RequestView]) -> Vec<Allowance> {
    if bytes_per_second == 0 {
        return vec![Allowance::Unlimited; requests.len()];
    }

    let mut per_peer: HashMap<&PeerId, usize> = HashMap::new();
    for request in requests {
        *per_peer.entry(&request.peer).or_insert(0) += 1;
    }
    if per_peer.is_empty() {
        return Vec::new();
    }

    let allowed = bytes_per_second as f64 * elapsed.as_secs_f64();
    let peer_share = allowed / per_peer.len() as f64;

    requests
        .iter()
        .map(|request| {
            if peer_share <= 0.0 {
                return Allowance::Unlimited;
            }
            let siblings = per_peer[&request.peer] as f64;
            let exact = peer_share / siblings + request.carry;
            let whole = exact.floor();
            Allowance::Bytes {
                bytes: whole.min(request.remaining as f64) as usize,
                carry: exact - whole,
            }
        })
        .collect()
}
