//! Bounded, newest-first record of completed rounds.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use healthprobe_common::Round;

pub const DEFAULT_HISTORY_CAPACITY: usize = 10;
/// Largest history accepted from configuration.
pub const MAX_HISTORY_CAPACITY: usize = 10_000;

/// Ring of the most recent rounds.
///
/// One lock guards both `push` and the snapshot taken by `latest`, so a
/// reader never sees the buffer mid-shift. Rounds are stored behind `Arc`
/// and never mutated after insertion.
pub struct HistoryStore {
    capacity: usize,
    rounds: Mutex<VecDeque<Arc<Round>>>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryStore {
    /// `capacity` is clamped to at least one entry.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            rounds: Mutex::new(VecDeque::with_capacity(capacity.min(MAX_HISTORY_CAPACITY))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert a completed round as the newest entry, evicting the oldest when full.
    pub fn push(&self, round: Arc<Round>) {
        let mut rounds = self.lock();
        if rounds.len() == self.capacity {
            rounds.pop_back();
        }
        rounds.push_front(round);
    }

    /// Snapshot of up to `n` rounds (all of them for `None`), newest first.
    pub fn latest(&self, n: Option<usize>) -> Vec<Arc<Round>> {
        let rounds = self.lock();
        let n = n.unwrap_or(rounds.len());
        rounds.iter().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // The buffer is consistent after every statement, so a poisoned lock is safe to reuse.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<Round>>> {
        self.rounds.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Read-only view of the history for status consumers.
#[derive(Clone)]
pub struct StatusReader {
    store: Arc<HistoryStore>,
}

impl StatusReader {
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self { store }
    }

    pub fn latest(&self, n: Option<usize>) -> Vec<Arc<Round>> {
        self.store.latest(n)
    }

    pub fn latest_round(&self) -> Option<Arc<Round>> {
        self.store.latest(Some(1)).into_iter().next()
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }
}
