//! FIFO write queue with front re-insertion for partially-admitted requests

use crate::error::{FlowError, FlowResult};
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// Channel end used to notify a caller that its write finished
pub type CompletionSender = oneshot::Sender<FlowResult<()>>;

/// A pending write: payload, admission cursor, and completion notifier
///
/// The completion notifier fires exactly once, after the last byte of the
/// payload has been admitted (not after downstream persistence).
#[derive(Debug)]
pub struct WriteRequest {
    seq: u64,
    payload: Vec<u8>,
    cursor: usize,
    completion: Option<CompletionSender>,
}

impl WriteRequest {
    fn new(seq: u64, payload: Vec<u8>, completion: CompletionSender) -> Self {
        Self {
            seq,
            payload,
            cursor: 0,
            completion: Some(completion),
        }
    }

    /// Sequence number assigned at enqueue; defines submission order
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Bytes not yet admitted
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.cursor
    }

    /// Whether every byte has been admitted
    pub fn is_drained(&self) -> bool {
        self.cursor == self.payload.len()
    }

    /// Slice off the next `n` bytes, advancing the admission cursor
    pub fn take_chunk(&mut self, n: usize) -> Vec<u8> {
        debug_assert!(n <= self.remaining(), "take_chunk past the payload end");
        let end = self.cursor + n;
        let chunk = self.payload[self.cursor..end].to_vec();
        self.cursor = end;
        chunk
    }

    /// Fire the completion notifier; a dropped receiver is not an error
    pub fn complete(mut self, outcome: FlowResult<()>) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(outcome);
        }
    }
}

/// Ordered queue of pending writes
///
/// Strict FIFO except [`WriteQueue::push_front`], which re-inserts a
/// partially-admitted request so it is retried before anything enqueued after
/// it. Sequence numbers are assigned here and never reused.
#[derive(Debug, Default)]
pub struct WriteQueue {
    items: VecDeque<WriteRequest>,
    next_seq: u64,
}

impl WriteQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a new write at the back, assigning its sequence number
    pub fn push_back(&mut self, payload: Vec<u8>, completion: CompletionSender) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push_back(WriteRequest::new(seq, payload, completion));
        seq
    }

    /// Re-insert a partially-admitted request at the front
    pub fn push_front(&mut self, request: WriteRequest) {
        debug_assert!(
            self.items.front().map_or(true, |next| request.seq < next.seq),
            "front re-insertion must preserve submission order"
        );
        self.items.push_front(request);
    }

    /// Remove and return the head request
    pub fn pop_front(&mut self) -> Option<WriteRequest> {
        self.items.pop_front()
    }

    /// Peek at the head request
    pub fn front(&self) -> Option<&WriteRequest> {
        self.items.front()
    }

    /// Whether the queue holds no requests
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of queued requests
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Fail every queued request with the given error, emptying the queue
    pub fn fail_all(&mut self, err: &FlowError) {
        for request in self.items.drain(..) {
            request.complete(Err(err.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enqueue(queue: &mut WriteQueue, payload: &[u8]) -> oneshot::Receiver<FlowResult<()>> {
        let (tx, rx) = oneshot::channel();
        queue.push_back(payload.to_vec(), tx);
        rx
    }

    #[test]
    fn test_fifo_order_and_sequence_assignment() {
        let mut queue = WriteQueue::new();
        let _a = enqueue(&mut queue, b"aaa");
        let _b = enqueue(&mut queue, b"bb");
        assert_eq!(queue.len(), 2);

        let first = queue.pop_front().expect("first");
        let second = queue.pop_front().expect("second");
        assert_eq!(first.seq(), 0);
        assert_eq!(second.seq(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_front_reinsertion_preserves_submission_order() {
        let mut queue = WriteQueue::new();
        let _a = enqueue(&mut queue, b"aaaa");
        let _b = enqueue(&mut queue, b"b");

        let mut head = queue.pop_front().expect("head");
        let chunk = head.take_chunk(2);
        assert_eq!(chunk, b"aa");
        assert_eq!(head.remaining(), 2);
        queue.push_front(head);

        // The partially-admitted request is retried before the later one.
        let head = queue.front().expect("head");
        assert_eq!(head.seq(), 0);
        assert_eq!(head.remaining(), 2);
    }

    #[test]
    fn test_cursor_advances_until_drained() {
        let mut queue = WriteQueue::new();
        let mut rx = enqueue(&mut queue, b"abcdef");
        let mut request = queue.pop_front().expect("request");

        assert_eq!(request.take_chunk(4), b"abcd");
        assert!(!request.is_drained());
        assert_eq!(request.take_chunk(2), b"ef");
        assert!(request.is_drained());

        assert!(rx.try_recv().is_err());
        request.complete(Ok(()));
        assert_eq!(rx.try_recv().expect("completed"), Ok(()));
    }

    #[test]
    fn test_fail_all_notifies_every_request() {
        let mut queue = WriteQueue::new();
        let mut receivers = vec![
            enqueue(&mut queue, b"1"),
            enqueue(&mut queue, b"2"),
            enqueue(&mut queue, b"3"),
        ];

        queue.fail_all(&FlowError::aborted("shutdown"));
        assert!(queue.is_empty());
        for rx in receivers.iter_mut() {
            let outcome = rx.try_recv().expect("notified");
            assert_eq!(outcome, Err(FlowError::aborted("shutdown")));
        }
    }
}
