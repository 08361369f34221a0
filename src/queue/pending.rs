//! The ordered pending list of a single destination.
//!
//! Entries are kept sorted by priority, highest first, and in admission order
//! within a priority tier. Requeued entries are the exception: a rate-limited
//! drain puts its unsent entries back at the very front, ahead of anything
//! admitted since, so they are retried first.

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::types::EventKind;

use super::event::{DedupKey, LogEvent};

#[derive(Debug, Default)]
pub struct PendingList {
    entries: VecDeque<LogEvent>,
}

impl PendingList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEvent> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut LogEvent> {
        self.entries.iter_mut()
    }

    pub fn front(&self) -> Option<&LogEvent> {
        self.entries.front()
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut LogEvent> {
        self.entries.get_mut(idx)
    }

    pub fn position(&self, pred: impl Fn(&LogEvent) -> bool) -> Option<usize> {
        self.entries.iter().position(pred)
    }

    pub fn remove(&mut self, idx: usize) -> Option<LogEvent> {
        self.entries.remove(idx)
    }

    /// Inserts `event` before the first entry of strictly lower priority.
    ///
    /// Equal priorities stay FIFO.
    pub fn insert_by_priority(&mut self, event: LogEvent) {
        let idx = self
            .entries
            .iter()
            .position(|e| e.priority < event.priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(idx, event);
    }

    /// Evicts entries until at most `cap` remain.
    ///
    /// Each eviction removes the oldest entry of the lowest priority tier
    /// present. Returns the number of entries evicted.
    pub fn evict_over(&mut self, cap: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > cap {
            let Some(lowest) = self.entries.iter().map(|e| e.priority).min() else {
                break;
            };
            let Some(idx) = self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.priority == lowest)
                .min_by_key(|(_, e)| e.admitted_at)
                .map(|(idx, _)| idx)
            else {
                break;
            };
            self.entries.remove(idx);
            evicted += 1;
        }
        evicted
    }

    /// Puts `events` back at the front, preserving their order.
    pub fn push_front_all(&mut self, events: Vec<LogEvent>) {
        for event in events.into_iter().rev() {
            self.entries.push_front(event);
        }
    }

    /// Pops up to `n` entries from the front, skipping held ones.
    pub fn take_ready(&mut self, n: usize, now: Instant) -> Vec<LogEvent> {
        let mut taken = Vec::with_capacity(n.min(self.entries.len()));
        let mut kept = VecDeque::with_capacity(self.entries.len());
        while let Some(event) = self.entries.pop_front() {
            if taken.len() < n && !event.is_held(now) {
                taken.push(event);
            } else {
                kept.push_back(event);
            }
        }
        self.entries = kept;
        taken
    }

    pub fn take_all(&mut self) -> Vec<LogEvent> {
        self.entries.drain(..).collect()
    }

    /// The most recently admitted pending entry of `kind`.
    pub fn last_of_kind_mut(&mut self, kind: &EventKind) -> Option<&mut LogEvent> {
        self.entries
            .iter_mut()
            .filter(|e| &e.kind == kind)
            .max_by_key(|e| e.admitted_at)
    }

    pub fn find_by_key_mut(&mut self, key: &DedupKey) -> Option<&mut LogEvent> {
        self.entries
            .iter_mut()
            .find(|e| e.carries_key(key))
    }

    /// True if at least one entry can be drained at `now`.
    pub fn has_ready(&self, now: Instant) -> bool {
        self.entries.iter().any(|e| !e.is_held(now))
    }

    /// Earliest hold expiry among held entries.
    pub fn earliest_hold(&self, now: Instant) -> Option<Instant> {
        self.entries
            .iter()
            .filter(|e| e.is_held(now))
            .filter_map(|e| e.hold_until)
            .min()
    }
}
