//! # Write Queue
//!
//! The bounded FIFO between the broker's publish thread (producer) and
//! the batch writer thread (consumer). This is the only shared mutable
//! state in the plugin.
//!
//! ## Contract
//!
//! - [`WriteQueue::push`] appends an entry and signals the consumer once
//!   the configured batch threshold is reached.
//! - [`WriteQueue::wait_drain`] blocks the consumer until the threshold
//!   is reached, shutdown is requested, or the timeout elapses, then
//!   takes every queued entry in push order.
//! - The queue never holds more than [`QUEUE_HARD_CAP`] entries: a push
//!   against a full queue drops the oldest entry, keeping callback
//!   latency flat and favoring recent telemetry. The drop is logged at
//!   most once per second.
//!
//! The lock is held only for O(1) pointer work (`VecDeque` push and a
//! buffer swap); all I/O happens outside it, on the consumer's side.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::types::QueueEntry;

/// Hard upper bound on queued entries. Producers never block on a full
/// queue and the queue never grows past this.
pub const QUEUE_HARD_CAP: usize = 15_000;

/// Minimum interval between overflow warnings.
const OVERFLOW_WARN_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Queue State
// =============================================================================

/// Everything guarded by the queue mutex.
///
/// The shutdown flag lives under the same lock as the entries so the
/// consumer's condvar wait observes flag and contents atomically.
#[derive(Debug)]
struct QueueState {
    entries: VecDeque<QueueEntry>,
    shutdown: bool,

    /// Entries dropped since the last overflow warning.
    dropped: u64,
    last_overflow_warn: Option<Instant>,
}

// =============================================================================
// WriteQueue
// =============================================================================

/// Bounded producer/consumer FIFO with early-drain signaling.
#[derive(Debug)]
pub struct WriteQueue {
    state: Mutex<QueueState>,
    ready: Condvar,

    /// Queue length at which `push` wakes the consumer without waiting
    /// for the flush timeout. Always `<=` [`QUEUE_HARD_CAP`].
    batch_threshold: usize,
}

impl WriteQueue {
    pub fn new(batch_threshold: usize) -> Self {
        debug_assert!(batch_threshold >= 1 && batch_threshold <= QUEUE_HARD_CAP);
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                shutdown: false,
                dropped: 0,
                last_overflow_warn: None,
            }),
            ready: Condvar::new(),
            batch_threshold,
        }
    }

    /// Appends an entry, evicting the oldest one first if the queue is at
    /// the hard cap. Signals the consumer when the batch threshold is
    /// reached.
    pub fn push(&self, entry: QueueEntry) {
        let mut state = self.state.lock();

        if state.entries.len() >= QUEUE_HARD_CAP {
            state.entries.pop_front();
            state.dropped += 1;
            let warn_due = state
                .last_overflow_warn
                .map_or(true, |at| at.elapsed() >= OVERFLOW_WARN_INTERVAL);
            if warn_due {
                warn!(
                    dropped = state.dropped,
                    cap = QUEUE_HARD_CAP,
                    "write queue full, dropping oldest entries"
                );
                state.last_overflow_warn = Some(Instant::now());
                state.dropped = 0;
            }
        }

        state.entries.push_back(entry);

        if state.entries.len() >= self.batch_threshold {
            self.ready.notify_one();
        }
    }

    /// Consumer side: waits until the batch threshold is reached, shutdown
    /// is requested, or `timeout` elapses, then takes all queued entries.
    ///
    /// Returns the entries in push order and whether shutdown was
    /// observed. A timeout with a partially-filled queue is the normal
    /// flush path, not an error.
    pub fn wait_drain(&self, timeout: Duration) -> (VecDeque<QueueEntry>, bool) {
        let mut state = self.state.lock();

        if state.entries.len() < self.batch_threshold && !state.shutdown {
            let _ = self.ready.wait_for(&mut state, timeout);
        }

        (std::mem::take(&mut state.entries), state.shutdown)
    }

    /// Takes all queued entries without waiting. Used for the final drain
    /// during shutdown.
    pub fn drain(&self) -> VecDeque<QueueEntry> {
        std::mem::take(&mut self.state.lock().entries)
    }

    /// Requests shutdown and wakes the consumer.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Tests
// =============================================================================
