//! Queue Manager: per-destination pending list and scheduling state.
//!
//! A [`QueueState`] is owned by exactly one destination worker, which is the
//! only code that ever mutates it. Admission runs the merge rules, inserts by
//! priority and enforces the cap; the scheduling half (timer, drain
//! bookkeeping, backoff) lives in [`schedule`].

mod event;
mod pending;
mod schedule;

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::delivery::BackoffConfig;
use crate::merge::{self, DropReason, MergeKind, MergeOutcome, MergeWindows, RecentActivity};
use crate::types::DestinationKey;

pub use event::{DedupKey, LogEvent};
pub use pending::PendingList;
pub use schedule::{DrainVerdict, TimerAction};

/// Default cap on a destination's pending list.
pub const DEFAULT_MAX_PENDING: usize = 200;

/// Default number of entries popped per drain.
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Per-destination limits and windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueConfig {
    pub max_pending: usize,
    pub chunk_size: usize,
    pub windows: MergeWindows,
    pub backoff: BackoffConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            max_pending: DEFAULT_MAX_PENDING,
            chunk_size: DEFAULT_CHUNK_SIZE,
            windows: MergeWindows::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Result of admitting one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Inserted as a new pending entry; `evicted` entries were dropped to stay
    /// under the cap.
    Queued { evicted: usize },
    Merged(MergeKind),
    Dropped(DropReason),
}

/// Pending list plus scheduling state for one destination.
#[derive(Debug)]
pub struct QueueState {
    key: DestinationKey,
    config: QueueConfig,
    pending: PendingList,
    recent: RecentActivity,

    /// Armed flush deadline.
    flush_at: Option<Instant>,

    /// True while a drain owns a popped chunk.
    draining: bool,

    /// Rate-limit cooldown. Only ever moves forward.
    retry_not_before: Option<Instant>,

    /// Consecutive rate limits since the last successful send.
    retry_count: u32,

    torn_down: bool,
}

impl QueueState {
    pub fn new(key: DestinationKey, config: QueueConfig) -> Self {
        QueueState {
            key,
            config,
            pending: PendingList::default(),
            recent: RecentActivity::default(),
            flush_at: None,
            draining: false,
            retry_not_before: None,
            retry_count: 0,
            torn_down: false,
        }
    }

    pub fn key(&self) -> &DestinationKey {
        &self.key
    }

    pub fn pending(&self) -> &PendingList {
        &self.pending
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn retry_not_before(&self) -> Option<Instant> {
        self.retry_not_before
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Runs the merge rules over `event` and, if nothing claims it, inserts it
    /// by priority, evicting over the cap.
    pub fn admit(&mut self, event: LogEvent, now: Instant) -> Admission {
        if self.torn_down {
            return Admission::Dropped(DropReason::TornDown);
        }

        let window = event.kind.bulk_window();
        let kind = event.kind.clone();
        let admission = match merge::merge(
            &mut self.pending,
            &mut self.recent,
            event,
            now,
            &self.config.windows,
        ) {
            MergeOutcome::Insert(event) => {
                self.pending.insert_by_priority(event);
                let evicted = self.pending.evict_over(self.config.max_pending);
                if evicted > 0 {
                    warn!(
                        destination = %self.key,
                        evicted,
                        cap = self.config.max_pending,
                        "Pending list over cap, evicted oldest lowest-priority entries"
                    );
                }
                Admission::Queued { evicted }
            }
            MergeOutcome::Merged(how) => Admission::Merged(how),
            MergeOutcome::Dropped(why) => Admission::Dropped(why),
        };

        if !matches!(admission, Admission::Dropped(_)) {
            self.arm_if_idle(now, window);
        }
        debug!(
            destination = %self.key,
            kind = %kind,
            ?admission,
            pending = self.pending.len(),
            "Admitted event"
        );
        admission
    }

    /// Arms the flush timer if nothing is armed, nothing is draining and there
    /// is something to drain.
    fn arm_if_idle(&mut self, now: Instant, delay: Duration) {
        if !self.draining && self.flush_at.is_none() && !self.pending.is_empty() {
            self.flush_at = Some(now + delay);
        }
    }
}
