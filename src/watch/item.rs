//! Per-file watch state: stability tracking, attempt counting, and backoff.
//!
//! Attempt count and next-eligible time are plain fields so the scheduler
//! needs no timers; the scan loop re-offers items once they are eligible.
//! The filesystem (inbox vs. success vs. fail) is the durable record of
//! outcome, so none of this state is persisted.

use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Lifecycle of one discovered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Waiting for the size to hold still across the stability window
    Stabilizing,
    /// Admitted and sitting in the bounded queue
    Queued,
    /// A worker attempt is in flight; never re-offered while here
    Processing,
    /// A transient failure parked it until `next_eligible`
    AwaitingRetry,
    /// Terminal: the file has been routed to success or fail
    Done,
}

/// One file observed in the inbox.
#[derive(Debug, Clone)]
pub struct WatchItem {
    pub path: PathBuf,
    pub state: ItemState,
    pub last_size: u64,
    pub stable_since: Instant,
    pub attempts: u32,
    pub next_eligible: Option<Instant>,
}

impl WatchItem {
    pub fn new(path: PathBuf, size: u64, now: Instant) -> Self {
        Self {
            path,
            state: ItemState::Stabilizing,
            last_size: size,
            stable_since: now,
            attempts: 0,
            next_eligible: None,
        }
    }

    /// Record the size seen this scan; a change restarts the stability clock.
    pub fn observe_size(&mut self, size: u64, now: Instant) {
        if size != self.last_size {
            self.last_size = size;
            self.stable_since = now;
        }
    }

    /// Unchanged size across the whole stability window.
    pub fn is_stable(&self, window: Duration, now: Instant) -> bool {
        now.duration_since(self.stable_since) >= window
    }

    /// Park after a transient failure, backing off by the attempts made so far.
    pub fn park_for_retry(&mut self, base: Duration, now: Instant) {
        self.state = ItemState::AwaitingRetry;
        self.next_eligible = Some(now + backoff_delay(base, self.attempts));
    }

    /// Ready to be re-offered to the queue.
    pub fn retry_eligible(&self, now: Instant) -> bool {
        self.state == ItemState::AwaitingRetry
            && self.next_eligible.is_some_and(|at| now >= at)
    }
}

/// Exponential backoff: `base * 2^(attempt-1)`, saturating.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor)
}
