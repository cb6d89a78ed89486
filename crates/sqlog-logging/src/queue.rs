//! The entry queue between loggers and the flush worker.
//!
//! Many producers append to the tail; the single flush worker reads and
//! removes from the head. The worker never removes anything it has not
//! first observed, so a prefix it has seen stays stable while producers keep
//! appending. This lets a flush address the "snapshot" as the first `n`
//! entries of the live queue instead of copying the whole queue up front.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use sqlog_core::{LogEntry, SequencedEntry};

/// Multi-producer, single-consumer FIFO of log entries.
#[derive(Debug, Default)]
pub struct LogQueue {
    entries: Mutex<VecDeque<Arc<LogEntry>>>,
}

impl LogQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Never blocks on I/O.
    pub fn enqueue(&self, entry: LogEntry) {
        self.entries.lock().push_back(Arc::new(entry));
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy up to `count` entries starting at `offset` from the head, pairing
    /// each with its ordinal `first_ordinal + i`.
    ///
    /// Consumer side only.
    pub fn peek(&self, offset: usize, count: usize, first_ordinal: i64) -> Vec<SequencedEntry> {
        let entries = self.entries.lock();
        entries
            .iter()
            .skip(offset)
            .take(count)
            .zip(first_ordinal..)
            .map(|(entry, ordinal)| SequencedEntry {
                ordinal,
                entry: Arc::clone(entry),
            })
            .collect()
    }

    /// Remove up to `count` entries from the head. Returns how many were removed.
    ///
    /// Consumer side only.
    pub fn dequeue(&self, count: usize) -> usize {
        let mut entries = self.entries.lock();
        let n = count.min(entries.len());
        drop(entries.drain(..n));
        n
    }

    /// Discard the oldest entries until at most `max_len` remain.
    /// Returns how many were discarded.
    ///
    /// Consumer side only.
    pub fn prune(&self, max_len: usize) -> usize {
        let mut entries = self.entries.lock();
        let excess = entries.len().saturating_sub(max_len);
        drop(entries.drain(..excess));
        excess
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
