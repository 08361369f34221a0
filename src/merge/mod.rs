//! Merge engine: decides whether an incoming event folds into something that
//! is already pending for its destination instead of becoming a new entry.
//!
//! Rules are applied in a fixed order and the first one that claims the event
//! wins:
//!
//! 1. exact dedup by caller-supplied key (pending entry gains missing fields),
//!    plus a short debounce on keys seen recently but no longer pending;
//! 2. bulk coalescing of `messageDelete` inside its sliding 2.75s window;
//! 3. cross-kind correlation, see [`correlation`];
//! 4. debounce by kind for batchable kinds.
//!
//! Entries remember the keys of everything folded into them, so a key is
//! matched even when its first event was coalesced into another entry.
//!
//! Duplicate-ban suppression happens before any of this, at ingress, because
//! it is keyed by guild and user rather than by destination.
//!
//! No rule ever fails: a rule that cannot find its target falls through and
//! the event is eventually inserted as a new entry.

pub mod correlation;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::queue::{DedupKey, LogEvent, PendingList};
use crate::types::{EventKind, UserId};

pub use correlation::{Correlation, CorrelationRule, RULES};

/// Default debounce interval for same-kind and same-key events.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Default window for stitching a member leave to a ban/kick of the same user.
pub const DEFAULT_CORRELATION_WINDOW: Duration = Duration::from_secs(3);

/// Time windows used by the merge rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeWindows {
    /// Same-kind / same-key debounce interval.
    pub debounce: Duration,
    /// Leave/ban correlation window (either direction).
    pub correlation: Duration,
}

impl Default for MergeWindows {
    fn default() -> Self {
        MergeWindows {
            debounce: DEFAULT_DEBOUNCE,
            correlation: DEFAULT_CORRELATION_WINDOW,
        }
    }
}

/// How an event was folded into existing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// Counted into a pending `messageDelete` inside the bulk window.
    BulkCoalesced,
    /// Same dedup key as a pending entry; missing fields were copied over.
    Deduplicated,
    /// Same batchable kind admitted within the debounce interval.
    Debounced,
    /// Absorbed by a cross-kind correlation rule.
    Correlated(&'static str),
}

/// Why an event was discarded without touching any pending entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The same key was seen moments ago.
    DebouncedKey,
    /// The same key belongs to an entry a drain is delivering right now.
    KeyInFlight,
    /// Duplicate of a recent ban for the same guild and user.
    DuplicateBan,
    /// The destination has been torn down.
    TornDown,
}

/// Result of running the merge rules over an incoming event.
#[derive(Debug)]
pub enum MergeOutcome {
    Merged(MergeKind),
    Dropped(DropReason),
    /// No rule claimed the event; the caller inserts it by priority.
    Insert(LogEvent),
}

/// Recent-activity bookkeeping the merge rules consult.
///
/// This is the only merge state that outlives a pending entry: it remembers
/// things about events that have already been popped by a drain.
#[derive(Debug, Default)]
pub struct RecentActivity {
    /// Last admission time per kind.
    pub kind_times: HashMap<EventKind, Instant>,
    /// Last time each dedup key was seen.
    pub keys: HashMap<DedupKey, Instant>,
    /// Keys of entries currently owned by an in-flight drain.
    pub in_flight_keys: HashSet<DedupKey>,
    /// Subjects of recent bans/kicks, kept after the entry has been popped so a
    /// trailing leave can still be absorbed.
    pub removals: HashMap<UserId, Instant>,
}

impl RecentActivity {
    /// Forgets everything older than the windows can ever look back.
    pub fn prune(&mut self, now: Instant, windows: &MergeWindows) {
        let horizon = windows
            .debounce
            .max(windows.correlation)
            .max(crate::types::MESSAGE_DELETE_WINDOW);
        self.kind_times
            .retain(|_, at| now.saturating_duration_since(*at) <= horizon);
        self.keys
            .retain(|_, at| now.saturating_duration_since(*at) <= windows.debounce);
        self.removals
            .retain(|_, at| now.saturating_duration_since(*at) <= windows.correlation);
    }

    fn kind_within(&self, kind: &EventKind, window: Duration, now: Instant) -> bool {
        self.kind_times
            .get(kind)
            .is_some_and(|at| now.saturating_duration_since(*at) <= window)
    }

    fn record(&mut self, event: &LogEvent, now: Instant) {
        self.kind_times.insert(event.kind.clone(), now);
        if let Some(key) = &event.dedup_key {
            self.keys.insert(key.clone(), now);
        }
        if event.kind.is_removal()
            && let Some(user) = event.payload.user_id()
        {
            self.removals.insert(user, now);
        }
    }
}

/// Runs the merge rules over `event`.
///
/// Mutates `pending` only when a rule claims the event (or, for correlation,
/// when the incoming event steals a payload from a pending entry).
pub fn merge(
    pending: &mut PendingList,
    recent: &mut RecentActivity,
    mut event: LogEvent,
    now: Instant,
    windows: &MergeWindows,
) -> MergeOutcome {
    recent.prune(now, windows);

    // Exact dedup by key. Runs first so a repeated key is never folded in as
    // a second batch item.
    if let Some(key) = event.dedup_key.clone() {
        if let Some(target) = pending.find_by_key_mut(&key) {
            let filled = target.payload.fill_missing_from(&event.payload);
            trace!(key = %key, filled, "Merged duplicate key into pending entry");
            recent.keys.insert(key, now);
            return MergeOutcome::Merged(MergeKind::Deduplicated);
        }
        if recent.in_flight_keys.contains(&key) {
            trace!(key = %key, "Dropping duplicate of in-flight entry");
            recent.keys.insert(key, now);
            return MergeOutcome::Dropped(DropReason::KeyInFlight);
        }
        if recent
            .keys
            .get(&key)
            .is_some_and(|at| now.saturating_duration_since(*at) < windows.debounce)
        {
            trace!(key = %key, "Dropping recently seen key");
            recent.keys.insert(key, now);
            return MergeOutcome::Dropped(DropReason::DebouncedKey);
        }
    }

    // Bulk coalescing: sliding window on the pending entry's last merge.
    if event.kind == EventKind::MessageDelete {
        let window = event.kind.bulk_window();
        if recent.kind_within(&event.kind, window, now)
            && let Some(target) = pending.last_of_kind_mut(&event.kind)
            && now.saturating_duration_since(target.last_merged_at) <= window
        {
            trace!(count = target.batch_count + 1, "Coalescing message deletion");
            recent.record(&event, now);
            target.fold_keyed(event.payload, event.dedup_key, now);
            return MergeOutcome::Merged(MergeKind::BulkCoalesced);
        }
    }

    // Cross-kind correlation. Ahead of kind debounce so a leave stitched to a
    // pending ban is never folded into another user's leave.
    for rule in RULES {
        match (rule.apply)(pending, recent, &mut event, now, windows) {
            Correlation::Absorbed => {
                trace!(rule = rule.name, kind = %event.kind, "Absorbed by correlation rule");
                recent.record(&event, now);
                return MergeOutcome::Merged(MergeKind::Correlated(rule.name));
            }
            Correlation::Enriched => {
                trace!(rule = rule.name, kind = %event.kind, "Enriched by correlation rule");
            }
            Correlation::NoMatch => {}
        }
    }

    // Debounce by kind.
    if event.batchable
        && recent.kind_within(&event.kind, windows.debounce, now)
        && let Some(target) = pending.last_of_kind_mut(&event.kind)
    {
        trace!(
            kind = %event.kind,
            count = target.batch_count + 1,
            "Debounced into pending entry"
        );
        recent.record(&event, now);
        target.fold_keyed(event.payload, event.dedup_key, now);
        return MergeOutcome::Merged(MergeKind::Debounced);
    }

    if event.kind == EventKind::MemberLeave {
        event.hold_until = Some(now + windows.correlation);
    }
    recent.record(&event, now);
    MergeOutcome::Insert(event)
}
