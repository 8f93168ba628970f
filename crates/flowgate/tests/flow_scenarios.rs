//! End-to-end scenarios for the flow-control sink
//!
//! Runs on a paused Tokio clock so window-boundary timers resolve
//! deterministically without wall-clock waits.

use async_trait::async_trait;
use flowgate::{Downstream, FlowConfig, FlowError, FlowResult, FlowSink, MemorySink};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Test adapter that records when each chunk was confirmed and how big it was
struct RecordingSink {
    chunks: Arc<Mutex<Vec<(Instant, usize)>>>,
    delays: Vec<Duration>,
    next_delay: usize,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            chunks: Arc::new(Mutex::new(Vec::new())),
            delays: Vec::new(),
            next_delay: 0,
        }
    }

    /// Cycle through the given per-chunk confirmation delays
    fn with_delays(delays: Vec<Duration>) -> Self {
        Self {
            chunks: Arc::new(Mutex::new(Vec::new())),
            delays,
            next_delay: 0,
        }
    }

    fn log(&self) -> Arc<Mutex<Vec<(Instant, usize)>>> {
        Arc::clone(&self.chunks)
    }
}

#[async_trait]
impl Downstream for RecordingSink {
    async fn forward(&mut self, chunk: Vec<u8>) -> FlowResult<()> {
        if !self.delays.is_empty() {
            let delay = self.delays[self.next_delay % self.delays.len()];
            self.next_delay += 1;
            tokio::time::sleep(delay).await;
        }
        self.chunks
            .lock()
            .expect("chunk log lock")
            .push((Instant::now(), chunk.len()));
        Ok(())
    }
}

fn config(capacity: usize, ceiling: usize, window: Duration) -> FlowConfig {
    FlowConfig::new(capacity, ceiling, window).expect("valid test config")
}

// Scenario: five 20-byte writes against capacity 20 and ceiling 100/s. The
// buffer drains between admissions, so all five fit in the first window with
// no rate deferral.
#[tokio::test(start_paused = true)]
async fn small_writes_complete_in_order_within_one_window() {
    let memory = MemorySink::new();
    let buffer = memory.buffer();
    let sink = FlowSink::new(config(20, 100, Duration::from_secs(1)), memory).expect("construct");

    let handles: Vec<_> = (0..5u8)
        .map(|i| sink.write(vec![b'a' + i; 20]))
        .collect();
    for handle in handles {
        handle.await.expect("write completes");
    }

    let stats = sink.stats().await.expect("stats");
    assert_eq!(stats.writes_completed, 5);
    assert_eq!(stats.bytes_admitted, 100);
    assert_eq!(stats.rate_deferrals, 0);
    assert_eq!(stats.window_rollovers, 0);

    sink.close().await.expect("close");
    tokio::task::yield_now().await;

    // Admission order is submission order, byte for byte.
    let mut expected = Vec::new();
    for i in 0..5u8 {
        expected.extend(std::iter::repeat(b'a' + i).take(20));
    }
    assert_eq!(*buffer.lock().await, expected);
}

// Scenario: a single 250-byte write against ceiling 100/s completes only
// after two window boundaries, and no window carries more than 100 bytes.
#[tokio::test(start_paused = true)]
async fn oversized_write_slices_across_windows() {
    let window = Duration::from_secs(1);
    let recorder = RecordingSink::new();
    let log = recorder.log();
    let sink = FlowSink::new(config(1000, 100, window), recorder).expect("construct");

    let start = Instant::now();
    sink.write(vec![0xAB; 250]).await.expect("write completes");
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");

    let stats = sink.stats().await.expect("stats");
    assert_eq!(stats.bytes_admitted, 250);
    assert_eq!(stats.rate_deferrals, 2);
    assert!(stats.window_rollovers >= 2);

    sink.close().await.expect("close");
    tokio::task::yield_now().await;

    // Group confirmed chunks by window index; each window stays under the
    // ceiling.
    let chunks = log.lock().expect("chunk log lock");
    assert_eq!(chunks.iter().map(|(_, len)| len).sum::<usize>(), 250);
    let mut per_window = std::collections::HashMap::new();
    for (at, len) in chunks.iter() {
        let index = at.duration_since(start).as_millis() / window.as_millis();
        *per_window.entry(index).or_insert(0usize) += len;
    }
    for (index, total) in per_window {
        assert!(total <= 100, "window {index} carried {total} bytes");
    }
}

// Scenario: a slow downstream adapter throttles admission through the buffer
// ceiling alone; buffered bytes never exceed capacity.
#[tokio::test(start_paused = true)]
async fn slow_downstream_bounds_buffered_bytes() {
    let recorder = RecordingSink::with_delays(vec![
        Duration::from_millis(3),
        Duration::from_millis(1),
        Duration::from_millis(4),
        Duration::from_millis(2),
    ]);
    let log = recorder.log();
    let sink = FlowSink::new(
        config(20, 1_000_000, Duration::from_secs(1)),
        recorder,
    )
    .expect("construct");

    let handles: Vec<_> = (0..100).map(|_| sink.write(vec![0x5A; 20])).collect();
    for outcome in futures::future::join_all(handles).await {
        outcome.expect("write completes");
    }

    let stats = sink.stats().await.expect("stats");
    assert_eq!(stats.writes_completed, 100);
    assert_eq!(stats.bytes_admitted, 2000);
    assert!(stats.peak_buffered <= 20, "peak {}", stats.peak_buffered);
    assert!(stats.buffer_deferrals > 0, "backpressure never engaged");
    assert_eq!(stats.rate_deferrals, 0);

    sink.close().await.expect("close");
    // Close resolves on admission; advance the paused clock so the writer
    // task's final delayed confirmation lands before counting the log.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(log.lock().expect("chunk log lock").len(), 100);
}

// Scenario: abort with three queued requests fails all three, empties the
// queue, and rejects later writes.
#[tokio::test(start_paused = true)]
async fn abort_fails_all_queued_requests() {
    // A tiny ceiling and long window keep the requests stuck in the queue.
    let sink = FlowSink::new(
        config(1000, 10, Duration::from_secs(60)),
        MemorySink::new(),
    )
    .expect("construct");

    let first = sink.write(vec![1; 30]);
    let second = sink.write(vec![2; 10]);
    let third = sink.write(vec![3; 10]);

    let stats = sink.stats().await.expect("stats");
    assert_eq!(stats.writes_accepted, 3);

    sink.abort("shutdown");

    let cancelled = FlowError::aborted("shutdown");
    assert_eq!(first.await, Err(cancelled.clone()));
    assert_eq!(second.await, Err(cancelled.clone()));
    assert_eq!(third.await, Err(cancelled));

    let late = sink.write(vec![4; 10]).await;
    assert_eq!(late, Err(FlowError::Closed));

    let stats = sink.stats().await.expect("stats");
    assert_eq!(stats.writes_failed, 3);
    assert_eq!(stats.writes_rejected, 1);
}

// A sliced large write is never overtaken by smaller writes queued after it.
#[tokio::test(start_paused = true)]
async fn sliced_write_is_never_overtaken() {
    let memory = MemorySink::new();
    let buffer = memory.buffer();
    let sink = FlowSink::new(config(1000, 50, Duration::from_secs(1)), memory).expect("construct");

    let big = sink.write(vec![b'a'; 120]);
    let small_one = sink.write(vec![b'b'; 10]);
    let small_two = sink.write(vec![b'c'; 10]);

    big.await.expect("big write");
    small_one.await.expect("first small write");
    small_two.await.expect("second small write");

    sink.close().await.expect("close");
    tokio::task::yield_now().await;

    let mut expected = vec![b'a'; 120];
    expected.extend(vec![b'b'; 10]);
    expected.extend(vec![b'c'; 10]);
    assert_eq!(*buffer.lock().await, expected);
}

// When both ceilings block at once, the window wait wins: it has a
// deterministic wake-up, a buffer release may never come.
#[tokio::test(start_paused = true)]
async fn simultaneous_block_prefers_the_window_wait() {
    let sink = FlowSink::new(
        config(20, 20, Duration::from_secs(1)),
        MemorySink::new(),
    )
    .expect("construct");

    // First write exhausts both ceilings at once.
    sink.write(vec![0x11; 20]).await.expect("first write");
    sink.write(vec![0x22; 20]).await.expect("second write");

    let stats = sink.stats().await.expect("stats");
    assert_eq!(stats.writes_completed, 2);
    assert!(stats.rate_deferrals >= 1, "window wait never taken");
}

// Writes submitted slower than the rate ceiling never defer.
#[tokio::test(start_paused = true)]
async fn paced_writes_never_defer() {
    let sink = FlowSink::new(
        config(1000, 100, Duration::from_secs(1)),
        MemorySink::new(),
    )
    .expect("construct");

    for i in 0..10u8 {
        sink.write(vec![i; 50]).await.expect("paced write");
        tokio::time::sleep(Duration::from_millis(600)).await;
    }

    let stats = sink.stats().await.expect("stats");
    assert_eq!(stats.writes_completed, 10);
    assert_eq!(stats.rate_deferrals, 0);
    assert_eq!(stats.buffer_deferrals, 0);
}
