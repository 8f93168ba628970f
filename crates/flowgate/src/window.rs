//! Fixed-window rate tracker with lazy rollover
//!
//! The tracker counts bytes admitted within the current window and rolls the
//! window over lazily on each query once the window length has elapsed. It
//! never schedules wake-ups itself; the controller arms a timer at
//! [`RateWindow::next_boundary`] when it needs to resume after throttling.
//!
//! Queries take `now` as a parameter so the drain algorithm stays testable
//! without real timers.

use std::time::Duration;
use tokio::time::Instant;

/// Tracks bytes admitted within the current fixed-length window
#[derive(Debug)]
pub struct RateWindow {
    started: Instant,
    length: Duration,
    consumed: usize,
    ceiling: usize,
    rollovers: u64,
}

impl RateWindow {
    /// Create a tracker whose first window starts at `now`
    ///
    /// Ceiling and length positivity are enforced by
    /// [`FlowConfig::validate`](crate::FlowConfig::validate) before construction.
    pub fn new(ceiling: usize, length: Duration, now: Instant) -> Self {
        debug_assert!(ceiling > 0, "ceiling must be positive");
        debug_assert!(!length.is_zero(), "window length must be positive");
        Self {
            started: now,
            length,
            consumed: 0,
            ceiling,
            rollovers: 0,
        }
    }

    /// Roll the window if it has expired, resetting start and consumed together
    fn roll_if_expired(&mut self, now: Instant) {
        if now.duration_since(self.started) >= self.length {
            self.started = now;
            self.consumed = 0;
            self.rollovers += 1;
        }
    }

    /// Bytes that may still be admitted in the current window
    pub fn remaining_allowance(&mut self, now: Instant) -> usize {
        self.roll_if_expired(now);
        self.ceiling.saturating_sub(self.consumed)
    }

    /// Record `n` admitted bytes
    ///
    /// The caller must have checked [`RateWindow::remaining_allowance`] first;
    /// exceeding the ceiling is a programming error.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(
            self.consumed + n <= self.ceiling,
            "consume past the window ceiling"
        );
        self.consumed += n;
    }

    /// Time elapsed within the current window
    pub fn elapsed_in_window(&mut self, now: Instant) -> Duration {
        self.roll_if_expired(now);
        now.duration_since(self.started)
    }

    /// The instant at which the current window ends
    pub fn next_boundary(&self) -> Instant {
        self.started + self.length
    }

    /// Number of times the window has rolled over
    pub fn rollovers(&self) -> u64 {
        self.rollovers
    }
}
