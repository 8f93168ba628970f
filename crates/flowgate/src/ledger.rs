//! Admission ledger: buffered-byte bookkeeping against a fixed capacity
//!
//! The ledger tracks how many admitted bytes are still awaiting downstream
//! persistence. It performs no I/O; the controller reserves on admission and
//! releases when the downstream sink confirms a chunk.

/// Tracks currently-buffered bytes against a configured capacity
#[derive(Debug)]
pub struct AdmissionLedger {
    buffered: usize,
    capacity: usize,
}

impl AdmissionLedger {
    /// Create a ledger with the given capacity
    ///
    /// Capacity positivity is enforced by [`FlowConfig::validate`](crate::FlowConfig::validate)
    /// before construction.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "capacity must be positive");
        Self {
            buffered: 0,
            capacity,
        }
    }

    /// Reserve `n` bytes if they fit, returning whether the reservation held
    pub fn try_reserve(&mut self, n: usize) -> bool {
        if self.buffered + n <= self.capacity {
            self.buffered += n;
            true
        } else {
            false
        }
    }

    /// Release `n` bytes once the downstream sink has persisted them
    ///
    /// Floored at zero; releasing more than is buffered empties the ledger.
    pub fn release(&mut self, n: usize) {
        self.buffered = self.buffered.saturating_sub(n);
    }

    /// Bytes that can still be reserved
    pub fn available(&self) -> usize {
        self.capacity - self.buffered
    }

    /// Bytes currently reserved
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
