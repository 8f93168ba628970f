//! Flow controller: the state machine that decides when and how much to admit
//!
//! A [`FlowSink`] spawns two tasks: the controller, which owns the admission
//! ledger, rate window, and write queue, and a writer, which feeds admitted
//! chunks to the [`Downstream`] adapter one at a time. All bookkeeping runs on
//! the controller task, so the drain loop reads consistent state without
//! locking. Suspension points exist only at the command channel, the release
//! channel, and the window-boundary timer.

use crate::config::FlowConfig;
use crate::error::{FlowError, FlowResult};
use crate::ledger::AdmissionLedger;
use crate::queue::{CompletionSender, WriteQueue};
use crate::sink::Downstream;
use crate::window::RateWindow;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, trace, warn};

/// Lifecycle states of the flow controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    /// Queue empty, no timer armed
    Idle,
    /// Actively admitting queued bytes
    Draining,
    /// Blocked on the rate ceiling; a timer is armed for the window boundary
    WaitingOnWindow,
    /// Blocked on the buffer ceiling; waiting for a downstream release
    ///
    /// There is no timeout on this wait: it resolves only when the downstream
    /// adapter confirms a chunk and frees buffer space.
    WaitingOnBuffer,
    /// Close observed and the queue fully drained
    Closed,
    /// Terminal: a downstream failure occurred or the sink was aborted
    Failed,
}

/// Counters describing the sink's activity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowStats {
    /// Writes accepted into the queue
    pub writes_accepted: u64,
    /// Writes whose last byte was admitted
    pub writes_completed: u64,
    /// Writes failed by abort or downstream error
    pub writes_failed: u64,
    /// Writes rejected after close or failure
    pub writes_rejected: u64,
    /// Bytes admitted (reserved and forwarded)
    pub bytes_admitted: u64,
    /// Bytes confirmed and released by the downstream adapter
    pub bytes_released: u64,
    /// Highest buffered-byte count observed
    pub peak_buffered: usize,
    /// Times the rate window rolled over
    pub window_rollovers: u64,
    /// Times draining deferred to a window boundary
    pub rate_deferrals: u64,
    /// Times draining deferred to a downstream release
    pub buffer_deferrals: u64,
}

/// One admitted byte range on its way to the downstream adapter
struct Chunk {
    seq: u64,
    data: Vec<u8>,
}

/// Writer-task report for one forwarded chunk
enum Release {
    /// The chunk was persisted; its bytes leave the ledger
    Persisted { len: usize },
    /// The adapter failed; terminal for the sink
    Failed { seq: u64, len: usize, message: String },
}

enum Command {
    Write {
        payload: Vec<u8>,
        done: CompletionSender,
    },
    Close {
        done: CompletionSender,
    },
    Abort {
        reason: String,
    },
    Stats {
        reply: oneshot::Sender<FlowStats>,
    },
    State {
        reply: oneshot::Sender<FlowState>,
    },
}

/// Resolves once the last byte of the corresponding write has been admitted
///
/// Resolving does not mean the bytes were persisted; admission and
/// persistence are decoupled. A sink torn down before the write drains
/// resolves to [`FlowError::Closed`].
#[derive(Debug)]
pub struct WriteHandle {
    rx: oneshot::Receiver<FlowResult<()>>,
}

impl Future for WriteHandle {
    type Output = FlowResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(FlowError::Closed)))
    }
}

/// Resolves once every byte queued before `close` has been admitted
#[derive(Debug)]
pub struct CloseHandle {
    rx: oneshot::Receiver<FlowResult<()>>,
}

impl Future for CloseHandle {
    type Output = FlowResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(FlowError::Closed)))
    }
}

/// Rate- and buffer-bounded byte sink
///
/// Caps how many bytes may be buffered downstream at once and how many bytes
/// may be admitted per fixed time window, slicing oversized writes across
/// window boundaries. Completions fire strictly in submission order.
///
/// One writer at a time: the handle is not clonable and a single logical
/// producer is assumed.
#[derive(Debug)]
pub struct FlowSink {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl FlowSink {
    /// Validate the configuration and spawn the controller and writer tasks
    ///
    /// Must be called within a Tokio runtime.
    pub fn new<D: Downstream>(config: FlowConfig, downstream: D) -> FlowResult<Self> {
        config.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_writer(downstream, chunk_rx, release_tx));
        tokio::spawn(Controller::new(config, chunk_tx).run(cmd_rx, release_rx));

        Ok(Self { cmd_tx })
    }

    /// Submit a payload; the handle resolves when its last byte is admitted
    pub fn write(&self, payload: Vec<u8>) -> WriteHandle {
        let (done, rx) = oneshot::channel();
        // A failed send drops `done`, which resolves the handle as closed.
        let _ = self.cmd_tx.send(Command::Write { payload, done });
        WriteHandle { rx }
    }

    /// Stop accepting writes; the handle resolves once the queue has drained
    ///
    /// Idempotent: a second close observes the same outcome as the first.
    pub fn close(&self) -> CloseHandle {
        let (done, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Close { done });
        CloseHandle { rx }
    }

    /// Fail every queued write immediately with a cancellation error
    ///
    /// Subsequent writes are rejected. In-flight persistence of already
    /// admitted chunks is not interrupted.
    pub fn abort(&self, reason: impl Into<String>) {
        let _ = self.cmd_tx.send(Command::Abort {
            reason: reason.into(),
        });
    }

    /// Snapshot of the sink's counters
    pub async fn stats(&self) -> FlowResult<FlowStats> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Stats { reply })
            .map_err(|_| FlowError::Closed)?;
        rx.await.map_err(|_| FlowError::Closed)
    }

    /// Current controller state
    pub async fn state(&self) -> FlowResult<FlowState> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::State { reply })
            .map_err(|_| FlowError::Closed)?;
        rx.await.map_err(|_| FlowError::Closed)
    }
}

/// Feed admitted chunks to the downstream adapter, one at a time
async fn run_writer<D: Downstream>(
    mut downstream: D,
    mut chunk_rx: mpsc::UnboundedReceiver<Chunk>,
    release_tx: mpsc::UnboundedSender<Release>,
) {
    while let Some(chunk) = chunk_rx.recv().await {
        let len = chunk.data.len();
        match downstream.forward(chunk.data).await {
            Ok(()) => {
                // The controller may already be gone; persistence continues
                // for every chunk it admitted.
                let _ = release_tx.send(Release::Persisted { len });
            }
            Err(err) => {
                warn!(seq = chunk.seq, %err, "downstream adapter failed");
                let _ = release_tx.send(Release::Failed {
                    seq: chunk.seq,
                    len,
                    message: err.to_string(),
                });
                return;
            }
        }
    }
}

struct Controller {
    state: FlowState,
    closing: bool,
    ledger: AdmissionLedger,
    window: RateWindow,
    queue: WriteQueue,
    stats: FlowStats,
    chunk_tx: Option<mpsc::UnboundedSender<Chunk>>,
    close_waiters: Vec<CompletionSender>,
    failure: Option<FlowError>,
    commands_open: bool,
    releases_open: bool,
}

impl Controller {
    fn new(config: FlowConfig, chunk_tx: mpsc::UnboundedSender<Chunk>) -> Self {
        Self {
            state: FlowState::Idle,
            closing: false,
            ledger: AdmissionLedger::new(config.buffer_capacity),
            window: RateWindow::new(config.rate_ceiling, config.window, Instant::now()),
            queue: WriteQueue::new(),
            stats: FlowStats::default(),
            chunk_tx: Some(chunk_tx),
            close_waiters: Vec::new(),
            failure: None,
            commands_open: true,
            releases_open: true,
        }
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut release_rx: mpsc::UnboundedReceiver<Release>,
    ) {
        debug!(
            capacity = self.ledger.capacity(),
            "flow controller started"
        );
        loop {
            let boundary = self.window.next_boundary();
            let releases_open = self.releases_open;
            let commands_open = self.commands_open;
            let waiting_on_window = matches!(self.state, FlowState::WaitingOnWindow);
            tokio::select! {
                biased;
                maybe = release_rx.recv(), if releases_open => match maybe {
                    Some(release) => self.on_release(release),
                    None => self.releases_open = false,
                },
                maybe = cmd_rx.recv(), if commands_open => match maybe {
                    Some(command) => self.on_command(command),
                    None => self.on_commands_closed(),
                },
                _ = sleep_until(boundary), if waiting_on_window => {
                    debug!("window boundary reached, resuming drain");
                    self.state = FlowState::Draining;
                },
                else => break,
            }
            self.drain();
            if self.should_exit() {
                break;
            }
        }
        debug!("flow controller stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Write { payload, done } => self.on_write(payload, done),
            Command::Close { done } => self.on_close(done),
            Command::Abort { reason } => self.on_abort(reason),
            Command::Stats { reply } => {
                let mut stats = self.stats.clone();
                stats.window_rollovers = self.window.rollovers();
                let _ = reply.send(stats);
            }
            Command::State { reply } => {
                let _ = reply.send(self.state);
            }
        }
    }

    fn on_write(&mut self, payload: Vec<u8>, done: CompletionSender) {
        if self.closing || matches!(self.state, FlowState::Closed | FlowState::Failed) {
            self.stats.writes_rejected += 1;
            let _ = done.send(Err(FlowError::Closed));
            return;
        }
        let seq = self.queue.push_back(payload, done);
        self.stats.writes_accepted += 1;
        trace!(seq, queued = self.queue.len(), "write enqueued");
        if matches!(self.state, FlowState::Idle) {
            self.state = FlowState::Draining;
        }
    }

    fn on_close(&mut self, done: CompletionSender) {
        match self.state {
            FlowState::Failed => {
                let err = self.failure.clone().unwrap_or(FlowError::Closed);
                let _ = done.send(Err(err));
            }
            FlowState::Closed => {
                let _ = done.send(Ok(()));
            }
            _ => {
                debug!(queued = self.queue.len(), "close requested");
                self.closing = true;
                self.close_waiters.push(done);
                if self.queue.is_empty() {
                    self.finish_close();
                }
            }
        }
    }

    fn on_commands_closed(&mut self) {
        self.commands_open = false;
        // All handles dropped: behave like an unobserved close.
        if !matches!(self.state, FlowState::Closed | FlowState::Failed) {
            self.closing = true;
            if self.queue.is_empty() {
                self.finish_close();
            }
        }
    }

    fn on_abort(&mut self, reason: String) {
        if matches!(self.state, FlowState::Failed) {
            return;
        }
        warn!(%reason, queued = self.queue.len(), "sink aborted");
        self.fail_pending(FlowError::aborted(reason));
    }

    fn on_release(&mut self, release: Release) {
        match release {
            Release::Persisted { len } => {
                self.ledger.release(len);
                self.stats.bytes_released += len as u64;
                trace!(
                    bytes = len,
                    buffered = self.ledger.buffered(),
                    "downstream released"
                );
                if matches!(self.state, FlowState::WaitingOnBuffer) {
                    self.state = FlowState::Draining;
                }
            }
            Release::Failed { seq, len, message } => {
                self.ledger.release(len);
                let err = FlowError::downstream(message);
                error!(seq, %err, "downstream failure is terminal");
                // The owning request is still queued when only part of it was
                // admitted; its partial progress is reported as failure.
                if self.queue.front().map_or(false, |front| front.seq() == seq) {
                    if let Some(owner) = self.queue.pop_front() {
                        self.stats.writes_failed += 1;
                        owner.complete(Err(err.clone()));
                    }
                }
                self.fail_pending(err);
            }
        }
    }

    /// Fail everything still queued and refuse further admissions
    fn fail_pending(&mut self, err: FlowError) {
        self.stats.writes_failed += self.queue.len() as u64;
        self.queue.fail_all(&err);
        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
        self.failure = Some(err);
        self.state = FlowState::Failed;
        // Stop feeding the writer; chunks already sent still persist.
        self.chunk_tx = None;
    }

    fn finish_close(&mut self) {
        self.state = FlowState::Closed;
        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        debug!("queue drained, sink closed");
    }

    /// Admit queued bytes until blocked or the queue is empty
    fn drain(&mut self) {
        if !matches!(self.state, FlowState::Draining) {
            return;
        }
        loop {
            let Some(mut request) = self.queue.pop_front() else {
                if self.closing {
                    self.finish_close();
                } else {
                    self.state = FlowState::Idle;
                }
                return;
            };
            if request.is_drained() {
                self.complete_request(request);
                continue;
            }

            let now = Instant::now();
            let allowed_by_rate = self.window.remaining_allowance(now);
            let allowed_by_buffer = self.ledger.available();
            let admit = request
                .remaining()
                .min(allowed_by_rate)
                .min(allowed_by_buffer);

            if admit == 0 {
                let seq = request.seq();
                self.queue.push_front(request);
                // Tie resolves to the window wait: its wake-up is
                // deterministic, a buffer release may never come.
                if allowed_by_rate == 0 {
                    self.state = FlowState::WaitingOnWindow;
                    self.stats.rate_deferrals += 1;
                    debug!(seq, "rate ceiling reached, waiting for window boundary");
                } else {
                    self.state = FlowState::WaitingOnBuffer;
                    self.stats.buffer_deferrals += 1;
                    debug!(
                        seq,
                        buffered = self.ledger.buffered(),
                        "buffer full, waiting for downstream release"
                    );
                }
                return;
            }

            let reserved = self.ledger.try_reserve(admit);
            debug_assert!(reserved, "admit never exceeds the free buffer");
            self.window.consume(admit);
            let chunk = request.take_chunk(admit);
            self.stats.bytes_admitted += admit as u64;
            self.stats.peak_buffered = self.stats.peak_buffered.max(self.ledger.buffered());
            trace!(
                seq = request.seq(),
                bytes = admit,
                remaining = request.remaining(),
                "chunk admitted"
            );
            if let Some(tx) = &self.chunk_tx {
                let _ = tx.send(Chunk {
                    seq: request.seq(),
                    data: chunk,
                });
            }

            if request.is_drained() {
                self.complete_request(request);
            } else {
                self.queue.push_front(request);
            }
        }
    }

    fn complete_request(&mut self, request: crate::queue::WriteRequest) {
        self.stats.writes_completed += 1;
        trace!(seq = request.seq(), "write completed");
        request.complete(Ok(()));
    }

    fn should_exit(&self) -> bool {
        if self.commands_open {
            return false;
        }
        self.queue.is_empty()
            && matches!(
                self.state,
                FlowState::Idle | FlowState::Closed | FlowState::Failed
            )
    }
}
