//! The normalized record submitted to the engine.
//!
//! A `LogEvent` is created when an upstream observer sees something happen. It
//! either dies during admission (merged into an entry that is already pending)
//! or waits in its destination's pending list until it is delivered, evicted,
//! or the destination is torn down.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::types::{EventKind, EventPayload, EventPriority, GuildId, UserId};

/// Caller-supplied deduplication key.
///
/// Events sharing a key on the same destination are merged, never delivered
/// twice. Observers that can see the same logical event through two code
/// paths should derive the key from that logical event, not the path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(s: impl Into<String>) -> Self {
        DedupKey(s.into())
    }

    /// Key for a moderation action against a member: `<kind>:<guild>:<user>`.
    pub fn member_action(kind: &EventKind, guild: GuildId, user: UserId) -> Self {
        DedupKey(format!("{}:{}:{}", kind, guild, user))
    }

    /// Key for a message-scoped event: `<kind>:<message_id>`.
    pub fn message(kind: &EventKind, message_id: u64) -> Self {
        DedupKey(format!("{}:{}", kind, message_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DedupKey {
    fn from(s: String) -> Self {
        DedupKey(s)
    }
}

impl From<&str> for DedupKey {
    fn from(s: &str) -> Self {
        DedupKey(s.to_string())
    }
}

/// A log event, pending or about to be admitted.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub kind: EventKind,

    /// The first payload observed for this entry.
    pub payload: EventPayload,

    pub dedup_key: Option<DedupKey>,

    /// Keys of events folded in after the first.
    pub folded_keys: Vec<DedupKey>,

    /// Derived from `kind`.
    pub priority: EventPriority,

    /// Derived from `kind`.
    pub batchable: bool,

    /// Wall-clock time the event was created, for display.
    pub enqueued_at: DateTime<Utc>,

    /// Monotonic admission time; correlation windows are measured from here.
    pub admitted_at: Instant,

    /// Last time another event was folded in. Coalescing windows slide on this.
    pub last_merged_at: Instant,

    /// Total number of events this entry represents (1 + `batch_items.len()`).
    pub batch_count: u32,

    /// Payloads folded in after the first.
    pub batch_items: Vec<EventPayload>,

    /// While set and in the future, drains leave this entry in place.
    pub hold_until: Option<Instant>,
}

impl LogEvent {
    /// Creates an event, deriving priority and batchability from its kind.
    pub fn new(
        kind: EventKind,
        payload: EventPayload,
        dedup_key: Option<DedupKey>,
        now: Instant,
    ) -> Self {
        LogEvent {
            priority: kind.priority(),
            batchable: kind.is_batchable(),
            kind,
            payload,
            dedup_key,
            folded_keys: Vec::new(),
            enqueued_at: Utc::now(),
            admitted_at: now,
            last_merged_at: now,
            batch_count: 1,
            batch_items: Vec::new(),
            hold_until: None,
        }
    }

    /// Folds another instance of the same kind into this entry.
    pub fn fold(&mut self, payload: EventPayload, now: Instant) {
        self.fold_keyed(payload, None, now);
    }

    /// Like [`LogEvent::fold`], remembering the folded event's key so a later
    /// duplicate of it is recognized.
    pub fn fold_keyed(&mut self, payload: EventPayload, key: Option<DedupKey>, now: Instant) {
        self.folded_keys.extend(key);
        self.batch_items.push(payload);
        self.batch_count = 1 + self.batch_items.len() as u32;
        self.last_merged_at = now;
    }

    /// Folds a whole entry (and everything it had accumulated) into this one.
    pub fn absorb(&mut self, other: LogEvent) {
        self.batch_items.push(other.payload);
        self.batch_items.extend(other.batch_items);
        self.folded_keys.extend(other.dedup_key);
        self.folded_keys.extend(other.folded_keys);
        self.batch_count = 1 + self.batch_items.len() as u32;
        if other.last_merged_at > self.last_merged_at {
            self.last_merged_at = other.last_merged_at;
        }
    }

    /// Every dedup key this entry stands for.
    pub fn keys(&self) -> impl Iterator<Item = &DedupKey> {
        self.dedup_key.iter().chain(self.folded_keys.iter())
    }

    pub fn carries_key(&self, key: &DedupKey) -> bool {
        self.keys().any(|k| k == key)
    }

    /// All payloads this entry represents, first one first.
    pub fn payloads(&self) -> impl Iterator<Item = &EventPayload> {
        std::iter::once(&self.payload).chain(self.batch_items.iter())
    }

    pub fn payloads_mut(&mut self) -> impl Iterator<Item = &mut EventPayload> {
        std::iter::once(&mut self.payload).chain(self.batch_items.iter_mut())
    }

    /// Removes the first payload matching `pred`.
    ///
    /// Returns the removed payload and whether the entry is now empty (the
    /// caller must then drop the entry itself). Removing the primary payload
    /// promotes the next folded one.
    pub fn take_payload(
        &mut self,
        pred: impl Fn(&EventPayload) -> bool,
    ) -> Option<(EventPayload, bool)> {
        if pred(&self.payload) {
            if self.batch_items.is_empty() {
                return Some((self.payload.clone(), true));
            }
            let next = self.batch_items.remove(0);
            let removed = std::mem::replace(&mut self.payload, next);
            self.batch_count = 1 + self.batch_items.len() as u32;
            return Some((removed, false));
        }
        let idx = self.batch_items.iter().position(|p| pred(p))?;
        let removed = self.batch_items.remove(idx);
        self.batch_count = 1 + self.batch_items.len() as u32;
        Some((removed, false))
    }

    pub fn is_held(&self, now: Instant) -> bool {
        self.hold_until.is_some_and(|until| until > now)
    }
}
