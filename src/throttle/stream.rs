//! A byte stream whose reads and writes are paced by a [`Throttler`].

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::plan::Allowance;
use super::{PeerId, RuleSetId, ThrottleError, Throttler};
use crate::observability::metrics;

/// Allowance bookkeeping for one direction of the stream.
#[derive(Debug)]
struct Pacing {
    rule_set: RuleSetId,
    /// Bytes granted and not yet transferred.
    allowance: usize,
    /// Fractional grant carried to the next request.
    carry: f64,
    /// Size of the request currently parked on the scheduler.
    requested: usize,
    waiting: Option<oneshot::Receiver<Allowance>>,
    scratch: Vec<u8>,
}

impl Pacing {
    fn new(rule_set: RuleSetId) -> Self {
        Self {
            rule_set,
            allowance: 0,
            carry: 0.0,
            requested: 0,
            waiting: None,
            scratch: Vec::new(),
        }
    }

    fn apply(&mut self, grant: Result<Allowance, oneshot::error::RecvError>) {
        match grant {
            Ok(Allowance::Bytes { bytes, carry }) => {
                self.allowance = bytes;
                self.carry = carry;
            }
            // unlimited grant, or the scheduler was dropped: finish this request freely
            Ok(Allowance::Unlimited) | Err(_) => {
                self.allowance = self.requested.max(1);
                self.carry = 0.0;
            }
        }
    }
}

/// Wraps any duplex stream (plain, TLS, or an upgraded connection) to cap its
/// throughput. Reads and writes each draw from their own rule set; both are
/// keyed by the same peer.
#[derive(Debug)]
pub struct ThrottledStream<S> {
    inner: S,
    throttler: Throttler,
    peer: PeerId,
    read: Pacing,
    write: Pacing,
}

impl<S> ThrottledStream<S> {
    /// Pace both directions against `rule_set`.
    pub fn new(inner: S, throttler: Throttler, rule_set: RuleSetId, peer: PeerId) -> Self {
        Self::with_rule_sets(inner, throttler, rule_set, rule_set, peer)
    }

    /// Pace reads against `read` and writes against `write`.
    /// [`RuleSetId::NONE`] leaves that direction unpaced.
    pub fn with_rule_sets(
        inner: S,
        throttler: Throttler,
        read: RuleSetId,
        write: RuleSetId,
        peer: PeerId,
    ) -> Self {
        Self {
            inner,
            throttler,
            peer,
            read: Pacing::new(read),
            write: Pacing::new(write),
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn read_rule_set(&self) -> RuleSetId {
        self.read.rule_set
    }

    pub fn write_rule_set(&self) -> RuleSetId {
        self.write.rule_set
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn record(&self, rule_set: RuleSetId, bytes: usize) {
        if bytes > 0 && rule_set.0 < self.throttler.rule_set_count() {
            metrics::record_throttled_bytes(rule_set, bytes);
        }
    }
}

/// Poll until `pacing` holds a non-zero allowance.
///
/// `Ready(false)` means the rule set is unthrottled and the caller should go
/// straight to the inner stream.
fn poll_allowance(
    pacing: &mut Pacing,
    throttler: &Throttler,
    peer: &PeerId,
    wanted: usize,
    cx: &mut Context<'_>,
) -> Poll<bool> {
    loop {
        if pacing.allowance > 0 {
            return Poll::Ready(true);
        }
        if let Some(rx) = pacing.waiting.as_mut() {
            let grant = ready!(Pin::new(rx).poll(cx));
            pacing.waiting = None;
            pacing.apply(grant);
            continue;
        }
        match throttler.enqueue(pacing.rule_set, peer.clone(), wanted, pacing.carry) {
            Some(rx) => {
                pacing.requested = wanted;
                pacing.waiting = Some(rx);
            }
            None => return Poll::Ready(false),
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ThrottledStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 || !this.throttler.is_throttled(this.read.rule_set) {
            this.read.waiting = None;
            return Pin::new(&mut this.inner).poll_read(cx, buf);
        }

        let wanted = buf.remaining();
        if !ready!(poll_allowance(&mut this.read, &this.throttler, &this.peer, wanted, cx)) {
            return Pin::new(&mut this.inner).poll_read(cx, buf);
        }

        let limit = this.read.allowance.min(wanted);
        if this.read.scratch.len() < limit {
            this.read.scratch.resize(limit, 0);
        }
        let mut limited = ReadBuf::new(&mut this.read.scratch[..limit]);
        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited))?;
        let n = limited.filled().len();
        buf.put_slice(&this.read.scratch[..n]);
        this.read.allowance -= n;
        this.record(this.read.rule_set, n);
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ThrottledStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if buf.is_empty() || !this.throttler.is_throttled(this.write.rule_set) {
            this.write.waiting = None;
            return Pin::new(&mut this.inner).poll_write(cx, buf);
        }

        if !ready!(poll_allowance(&mut this.write, &this.throttler, &this.peer, buf.len(), cx)) {
            return Pin::new(&mut this.inner).poll_write(cx, buf);
        }

        let limit = this.write.allowance.min(buf.len());
        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, &buf[..limit]))?;
        this.write.allowance -= n;
        this.record(this.write.rule_set, n);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ThrottledStream<S> {
    /// Read until `buf` is full, the peer sends a short read, or `cancel` fires
    /// while waiting for an allowance.
    pub async fn read_throttled(
        &mut self,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<usize, ThrottleError> {
        let mut filled = 0;
        while filled < buf.len() {
            let wanted = buf.len() - filled;
            let allowed = match self.acquire(Direction::Read, wanted, filled, cancel).await? {
                Some(allowed) => allowed.min(wanted),
                None => wanted,
            };
            let n = self.inner.read(&mut buf[filled..filled + allowed]).await?;
            self.read.allowance = self.read.allowance.saturating_sub(n);
            self.record(self.read.rule_set, n);
            filled += n;
            if n < allowed {
                break;
            }
        }
        Ok(filled)
    }

    /// Write all of `buf`, waiting for allowances as needed.
    pub async fn write_throttled(
        &mut self,
        buf: &[u8],
        cancel: &CancellationToken,
    ) -> Result<usize, ThrottleError> {
        let mut written = 0;
        while written < buf.len() {
            let wanted = buf.len() - written;
            let allowed = match self.acquire(Direction::Write, wanted, written, cancel).await? {
                Some(allowed) => allowed.min(wanted),
                None => wanted,
            };
            self.inner.write_all(&buf[written..written + allowed]).await?;
            self.write.allowance = self.write.allowance.saturating_sub(allowed);
            self.record(self.write.rule_set, allowed);
            written += allowed;
        }
        Ok(written)
    }

    /// Wait for a non-zero allowance. `None` means unthrottled.
    async fn acquire(
        &mut self,
        direction: Direction,
        wanted: usize,
        transferred: usize,
        cancel: &CancellationToken,
    ) -> Result<Option<usize>, ThrottleError> {
        let pacing = match direction {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        };
        loop {
            if pacing.allowance > 0 {
                return Ok(Some(pacing.allowance));
            }
            // a request parked by an earlier call is still queued; wait on it
            let mut rx = match pacing.waiting.take() {
                Some(rx) => rx,
                None => {
                    let Some(rx) = self.throttler.enqueue(pacing.rule_set, self.peer.clone(), wanted, pacing.carry)
                    else {
                        return Ok(None);
                    };
                    pacing.requested = wanted;
                    rx
                }
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // keep a grant that already arrived, or the request that awaits one
                    match rx.try_recv() {
                        Ok(grant) => pacing.apply(Ok(grant)),
                        Err(oneshot::error::TryRecvError::Empty) => pacing.waiting = Some(rx),
                        Err(oneshot::error::TryRecvError::Closed) => {}
                    }
                    tracing::debug!(peer = %self.peer, transferred, "Throttled transfer cancelled");
                    return Err(ThrottleError::Cancelled { transferred });
                }
                grant = &mut rx => pacing.apply(grant),
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Read,
    Write,
}
