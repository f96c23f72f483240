//! Scheduler fairness and lifecycle on a paused clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use relay_engine::throttle::{PeerId, RuleSetId, Throttler};

const BPS: i64 = 10_000;

fn throttler() -> Throttler {
    let throttler = Throttler::initialize(1);
    throttler.set_burst_interval_ms(100);
    throttler.set_bytes_per_second(RuleSetId(0), BPS).unwrap();
    throttler
}

/// Spawn a throttled writer for `peer` and a reader counting what arrives.
fn spawn_transfer(throttler: &Throttler, peer: &str, len: usize) -> Arc<AtomicUsize> {
    let (near, far) = tokio::io::duplex(1 << 20);
    let mut stream = throttler.wrap(near, RuleSetId(0), PeerId::from(peer));
    tokio::spawn(async move {
        let _ = stream.write_throttled(&vec![1u8; len], &CancellationToken::new()).await;
    });
    count_arrivals(far)
}

fn count_arrivals(mut far: DuplexStream) -> Arc<AtomicUsize> {
    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    tokio::spawn(async move {
        let mut buf = vec![0u8; 8192];
        while let Ok(n) = far.read(&mut buf).await {
            if n == 0 {
                break;
            }
            counter.fetch_add(n, Ordering::SeqCst);
        }
    });
    received
}

fn assert_near(actual: usize, expected: usize, tolerance: usize) {
    assert!(
        actual.abs_diff(expected) <= tolerance,
        "expected about {expected} bytes, got {actual}"
    );
}

#[tokio::test(start_paused = true)]
async fn two_peers_split_the_budget_evenly() {
    let throttler = throttler();
    let a = spawn_transfer(&throttler, "a", 100_000);
    let b = spawn_transfer(&throttler, "b", 100_000);

    tokio::time::sleep(Duration::from_millis(1050)).await;

    // ten ticks of 1000 bytes, half each
    assert_near(a.load(Ordering::SeqCst), 5_000, 600);
    assert_near(b.load(Ordering::SeqCst), 5_000, 600);
    throttler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn fairness_is_per_peer_not_per_stream() {
    let throttler = throttler();
    let busy: Vec<_> = (0..3).map(|_| spawn_transfer(&throttler, "busy", 100_000)).collect();
    let quiet = spawn_transfer(&throttler, "quiet", 100_000);

    tokio::time::sleep(Duration::from_millis(1050)).await;

    let busy_total: usize = busy.iter().map(|c| c.load(Ordering::SeqCst)).sum();
    assert_near(quiet.load(Ordering::SeqCst), 5_000, 600);
    assert_near(busy_total, 5_000, 600);
    throttler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn zero_budget_passes_through_without_waiting() {
    let throttler = Throttler::initialize(1);
    throttler.set_bytes_per_second(RuleSetId(0), 0).unwrap();

    let (near, far) = tokio::io::duplex(1 << 20);
    let received = count_arrivals(far);
    let mut stream = throttler.wrap(near, RuleSetId(0), PeerId::from("peer"));

    let start = Instant::now();
    stream.write_throttled(&[0u8; 50_000], &CancellationToken::new()).await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);

    tokio::task::yield_now().await;
    drop(stream);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(received.load(Ordering::SeqCst), 50_000);
    throttler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_parked_writers() {
    let throttler = Throttler::initialize(1);
    throttler.set_burst_interval_ms(100);
    throttler.set_bytes_per_second(RuleSetId(0), 1).unwrap();

    let (near, _far) = tokio::io::duplex(1 << 20);
    let mut stream = throttler.wrap(near, RuleSetId(0), PeerId::from("slow"));
    let writer = tokio::spawn(async move {
        stream.write_throttled(&[0u8; 10_000], &CancellationToken::new()).await
    });

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!writer.is_finished());

    let start = Instant::now();
    throttler.shutdown().await;
    let written = writer.await.unwrap().unwrap();
    assert_eq!(written, 10_000);
    assert!(start.elapsed() <= Duration::from_millis(100));
    assert!(!throttler.is_throttled(RuleSetId(0)));
}

#[tokio::test(start_paused = true)]
async fn budget_changes_apply_on_the_next_tick() {
    let throttler = throttler();
    let counter = spawn_transfer(&throttler, "peer", 1_000_000);

    tokio::time::sleep(Duration::from_millis(1050)).await;
    let before = counter.load(Ordering::SeqCst);
    assert_near(before, 10_000, 1_100);

    throttler.set_bytes_per_second(RuleSetId(0), BPS * 4).unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_near(counter.load(Ordering::SeqCst) - before, 40_000, 4_100);
    throttler.shutdown().await;
}
