//! The shared scheduler: rule sets, pending queues and the tick loop.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::plan::{plan_tick, Allowance, RequestView};
use super::{PeerId, RuleSetId, ThrottleError, ThrottledStream};

pub const DEFAULT_BURST_INTERVAL_MS: u64 = 100;
pub const MIN_BURST_INTERVAL_MS: u64 = 1;
pub const MAX_BURST_INTERVAL_MS: u64 = 1000;

/// One blocked read or write waiting for its next allowance.
#[derive(Debug)]
struct PendingRequest {
    peer: PeerId,
    remaining: usize,
    carry: f64,
    reply: oneshot::Sender<Allowance>,
}

#[derive(Debug, Default)]
struct RuleSet {
    bytes_per_second: AtomicU64,
    pending: Mutex<Vec<PendingRequest>>,
}

#[derive(Debug)]
struct Shared {
    rule_sets: Vec<RuleSet>,
    burst_interval_ms: AtomicU64,
    started: AtomicBool,
    shut_down: AtomicBool,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a bandwidth scheduler. Clones share the same rule sets.
#[derive(Debug, Clone)]
pub struct Throttler {
    shared: Arc<Shared>,
}

impl Throttler {
    /// Create `rule_sets` unthrottled rule sets without starting the loop.
    pub fn new(rule_sets: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                rule_sets: (0..rule_sets).map(|_| RuleSet::default()).collect(),
                burst_interval_ms: AtomicU64::new(DEFAULT_BURST_INTERVAL_MS),
                started: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                stop: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    /// Create the rule sets and start the scheduling loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn initialize(rule_sets: usize) -> Self {
        let throttler = Self::new(rule_sets);
        throttler.start();
        throttler
    }

    /// Spawn the scheduling loop. Calling it again is a no-op.
    pub fn start(&self) {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(run_loop(shared));
        *self.shared.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        tracing::info!(
            rule_sets = self.shared.rule_sets.len(),
            burst_interval_ms = self.burst_interval_ms(),
            "Throttle scheduler started"
        );
    }

    /// Update a budget; negative values clamp to 0 (unthrottled).
    pub fn set_bytes_per_second(&self, id: RuleSetId, value: i64) -> Result<(), ThrottleError> {
        let rule_set = self.rule_set(id)?;
        let clamped = value.max(0) as u64;
        rule_set.bytes_per_second.store(clamped, Ordering::Relaxed);
        tracing::debug!(rule_set = %id, bytes_per_second = clamped, "Budget updated");
        Ok(())
    }

    pub fn bytes_per_second(&self, id: RuleSetId) -> Result<u64, ThrottleError> {
        Ok(self.rule_set(id)?.bytes_per_second.load(Ordering::Relaxed))
    }

    /// Set the tick period, clamped to 1..=1000 ms.
    pub fn set_burst_interval_ms(&self, value: u64) {
        let clamped = value.clamp(MIN_BURST_INTERVAL_MS, MAX_BURST_INTERVAL_MS);
        self.shared.burst_interval_ms.store(clamped, Ordering::Relaxed);
    }

    pub fn burst_interval_ms(&self) -> u64 {
        self.shared.burst_interval_ms.load(Ordering::Relaxed)
    }

    pub fn rule_set_count(&self) -> usize {
        self.shared.rule_sets.len()
    }

    /// Requests parked on a rule set, waiting for the next tick.
    pub fn pending_requests(&self, id: RuleSetId) -> Result<usize, ThrottleError> {
        let rule_set = self.rule_set(id)?;
        Ok(rule_set.pending.lock().unwrap_or_else(PoisonError::into_inner).len())
    }

    /// Stop the loop and release every parked caller.
    ///
    /// Released callers complete their transfers unthrottled.
    pub async fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.stop.cancel();
        let released = self.shared.release_all();
        let handle = self.shared.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Throttle scheduler task failed");
            }
        }
        tracing::info!(released, "Throttle scheduler stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::SeqCst)
    }

    /// Whether transfers on `id` currently go through the scheduler.
    pub fn is_throttled(&self, id: RuleSetId) -> bool {
        !self.is_shut_down()
            && self
                .shared
                .rule_sets
                .get(id.0)
                .map(|r| r.bytes_per_second.load(Ordering::Relaxed) > 0)
                .unwrap_or(false)
    }

    /// Wrap `stream` so its reads and writes draw from rule set `id`.
    pub fn wrap<S>(&self, stream: S, id: RuleSetId, peer: PeerId) -> ThrottledStream<S> {
        ThrottledStream::new(stream, self.clone(), id, peer)
    }

    /// Wrap `stream` with separate rule sets for reads and writes.
    pub fn wrap_split<S>(
        &self,
        stream: S,
        read: RuleSetId,
        write: RuleSetId,
        peer: PeerId,
    ) -> ThrottledStream<S> {
        ThrottledStream::with_rule_sets(stream, self.clone(), read, write, peer)
    }

    /// Park a request until the next tick. `None` means bypass the scheduler.
    pub(crate) fn enqueue(
        &self,
        id: RuleSetId,
        peer: PeerId,
        remaining: usize,
        carry: f64,
    ) -> Option<oneshot::Receiver<Allowance>> {
        let rule_set = self.shared.rule_sets.get(id.0)?;
        let (reply, rx) = oneshot::channel();
        let mut pending = rule_set.pending.lock().unwrap_or_else(PoisonError::into_inner);
        // checked under the lock so shutdown either sees this request or we see the flag
        if self.is_shut_down() || rule_set.bytes_per_second.load(Ordering::Relaxed) == 0 {
            return None;
        }
        pending.push(PendingRequest {
            peer,
            remaining,
            carry,
            reply,
        });
        Some(rx)
    }

    fn rule_set(&self, id: RuleSetId) -> Result<&RuleSet, ThrottleError> {
        self.shared
            .rule_sets
            .get(id.0)
            .ok_or(ThrottleError::UnknownRuleSet(id))
    }
}

impl Shared {
    /// One scheduling pass over every rule set.
    fn tick(&self, elapsed: Duration) {
        for (index, rule_set) in self.rule_sets.iter().enumerate() {
            let batch = std::mem::take(&mut *rule_set.pending.lock().unwrap_or_else(PoisonError::into_inner));
            if batch.is_empty() {
                continue;
            }

            let budget = rule_set.bytes_per_second.load(Ordering::Relaxed);
            let views: Vec<RequestView> = batch
                .iter()
                .map(|r| RequestView {
                    peer: r.peer.clone(),
                    remaining: r.remaining,
                    carry: r.carry,
                })
                .collect();
            let grants = plan_tick(budget, elapsed, &views);

            tracing::trace!(
                rule_set = index,
                requests = batch.len(),
                budget,
                elapsed_ms = elapsed.as_millis() as u64,
                "Throttle tick"
            );

            for (request, grant) in batch.into_iter().zip(grants) {
                if request.reply.send(grant).is_err() {
                    tracing::trace!(rule_set = index, peer = %request.peer, "Waiter went away before its grant");
                }
            }
        }
    }

    /// Release every parked caller with an unlimited grant.
    fn release_all(&self) -> usize {
        let mut released = 0;
        for rule_set in &self.rule_sets {
            let batch = std::mem::take(&mut *rule_set.pending.lock().unwrap_or_else(PoisonError::into_inner));
            for request in batch {
                let _ = request.reply.send(Allowance::Unlimited);
                released += 1;
            }
        }
        released
    }
}

async fn run_loop(shared: Arc<Shared>) {
    let mut last_tick = Instant::now();
    loop {
        let interval = Duration::from_millis(shared.burst_interval_ms.load(Ordering::Relaxed));
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shared.stop.cancelled() => break,
        }

        let now = Instant::now();
        let elapsed = now.duration_since(last_tick);
        last_tick = now;

        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| shared.tick(elapsed))) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(error = %message, "Throttle tick failed; continuing");
        }
        crate::observability::metrics::record_throttle_tick();
    }
    shared.release_all();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn budgets_clamp_and_validate() {
        let t = Throttler::new(2);
        t.set_bytes_per_second(RuleSetId(0), -5).unwrap();
        assert_eq!(t.bytes_per_second(RuleSetId(0)).unwrap(), 0);
        t.set_bytes_per_second(RuleSetId(1), 4096).unwrap();
        assert!(t.is_throttled(RuleSetId(1)));
        assert!(!t.is_throttled(RuleSetId(0)));
        assert!(matches!(
            t.set_bytes_per_second(RuleSetId(2), 1),
            Err(ThrottleError::UnknownRuleSet(RuleSetId(2)))
        ));
    }

    #[test]
    fn burst_interval_is_clamped() {
        let t = Throttler::new(1);
        t.set_burst_interval_ms(0);
        assert_eq!(t.burst_interval_ms(), 1);
        t.set_burst_interval_ms(5_000);
        assert_eq!(t.burst_interval_ms(), 1000);
    }

    #[tokio::test]
    async fn unthrottled_rule_set_bypasses_queue() {
        let t = Throttler::new(1);
        assert!(t.enqueue(RuleSetId(0), PeerId::from("a"), 10, 0.0).is_none());
        assert_eq!(t.pending_requests(RuleSetId(0)).unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_grants_parked_requests() {
        let t = Throttler::new(1);
        t.set_bytes_per_second(RuleSetId(0), 1_000).unwrap();
        t.set_burst_interval_ms(100);
        let rx = t.enqueue(RuleSetId(0), PeerId::from("a"), 10_000, 0.0).unwrap();
        assert_eq!(t.pending_requests(RuleSetId(0)).unwrap(), 1);

        t.start();
        t.start();
        match rx.await.unwrap() {
            Allowance::Bytes { bytes, .. } => assert_eq!(bytes, 100),
            Allowance::Unlimited => panic!("expected a bounded grant"),
        }
        t.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_releases_parked_requests() {
        let t = Throttler::new(1);
        t.set_bytes_per_second(RuleSetId(0), 1).unwrap();
        let rx = t.enqueue(RuleSetId(0), PeerId::from("a"), 10, 0.0).unwrap();
        t.shutdown().await;
        assert_eq!(rx.await.unwrap(), Allowance::Unlimited);
        assert!(t.enqueue(RuleSetId(0), PeerId::from("a"), 10, 0.0).is_none());
    }
}
