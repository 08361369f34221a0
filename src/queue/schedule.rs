//! Batching scheduler and drain bookkeeping.
//!
//! The worker owns the actual timer; this module only decides when it should
//! fire and what to do when it does. One drain per destination at a time is
//! enforced here: while `draining` is set there is no deadline to wait on, so
//! the worker's timer branch is disabled until the drain reports back.

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::delivery::{DrainOutcome, DrainReport};

use super::{LogEvent, QueueState};

/// What the worker should do when the flush deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Pop a chunk and start a drain.
    Drain,
    /// Not yet; the deadline was moved to this instant.
    Wait(Instant),
    /// Nothing to do.
    Idle,
}

/// What the worker should do after a drain reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainVerdict {
    Continue,
    /// The destination is permanently invalid and has been torn down.
    TornDown,
}

impl QueueState {
    /// Deadline the worker should sleep until, if any.
    pub fn flush_deadline(&self) -> Option<Instant> {
        if self.draining || self.torn_down {
            None
        } else {
            self.flush_at
        }
    }

    /// Called when the flush deadline passes.
    pub fn on_timer(&mut self, now: Instant) -> TimerAction {
        self.flush_at = None;
        if self.torn_down || self.draining || self.pending.is_empty() {
            return TimerAction::Idle;
        }
        if let Some(not_before) = self.retry_not_before
            && not_before > now
        {
            debug!(
                destination = %self.key,
                remaining_ms = (not_before - now).as_millis() as u64,
                "Flush deferred by rate-limit cooldown"
            );
            self.flush_at = Some(not_before);
            return TimerAction::Wait(not_before);
        }
        if !self.pending.has_ready(now) {
            return match self.pending.earliest_hold(now) {
                Some(hold) => {
                    self.flush_at = Some(hold);
                    TimerAction::Wait(hold)
                }
                None => TimerAction::Idle,
            };
        }
        TimerAction::Drain
    }

    /// Asks for a drain as soon as possible.
    ///
    /// The request still goes through [`on_timer`](Self::on_timer), so an active
    /// cooldown is respected. While a drain is running the request is kept and
    /// fires once it reports back.
    pub fn request_flush(&mut self, now: Instant) {
        if self.torn_down || self.pending.is_empty() {
            return;
        }
        self.flush_at = Some(now);
    }

    /// Pops the next chunk and marks the destination as draining.
    ///
    /// Returns an empty chunk (and leaves `draining` unset) if nothing is ready.
    pub fn begin_drain(&mut self, now: Instant) -> Vec<LogEvent> {
        if self.torn_down || self.draining {
            return Vec::new();
        }
        let chunk = self.pending.take_ready(self.config.chunk_size, now);
        if chunk.is_empty() {
            return chunk;
        }
        self.draining = true;
        for entry in &chunk {
            self.recent.in_flight_keys.extend(entry.keys().cloned());
            // Keep absorbing trailing leaves for a full window after the pop.
            if entry.kind.is_removal()
                && let Some(user) = entry.payload.user_id()
            {
                self.recent.removals.insert(user, now);
            }
        }
        debug!(
            destination = %self.key,
            popped = chunk.len(),
            remaining = self.pending.len(),
            "Starting drain"
        );
        chunk
    }

    /// Clears every correlation hold so a final drain can take everything.
    pub fn release_holds(&mut self) {
        for entry in self.pending.iter_mut() {
            entry.hold_until = None;
        }
    }

    /// Applies a finished drain's report.
    pub fn finish_drain(&mut self, report: DrainReport, now: Instant) -> DrainVerdict {
        self.draining = false;
        self.recent.in_flight_keys.clear();

        if report.delivered > 0 && self.retry_count > 0 {
            debug!(destination = %self.key, "Delivery succeeded, backoff reset");
            self.retry_count = 0;
        }

        match report.outcome {
            DrainOutcome::Completed => {}
            DrainOutcome::RateLimited { retry_after } => {
                let requeued = report.requeue.len();
                self.pending.push_front_all(report.requeue);
                self.pending.evict_over(self.config.max_pending);

                self.retry_count = self.retry_count.saturating_add(1);
                let not_before = now + retry_after;
                if self.retry_not_before.is_none_or(|current| not_before > current) {
                    self.retry_not_before = Some(not_before);
                }
                let delay = self.config.backoff.delay_for(retry_after, self.retry_count);
                self.flush_at = Some(now + delay);
                warn!(
                    destination = %self.key,
                    retry_after_ms = retry_after.as_millis() as u64,
                    delay_ms = delay.as_millis() as u64,
                    retry_count = self.retry_count,
                    requeued,
                    "Rate limited, backing off"
                );
                return DrainVerdict::Continue;
            }
            DrainOutcome::Invalidated => {
                let dropped = self.tear_down();
                error!(
                    destination = %self.key,
                    dropped,
                    "Destination permanently invalid, torn down"
                );
                return DrainVerdict::TornDown;
            }
        }

        if self.flush_at.is_none()
            && let Some(head) = self.pending.front()
        {
            self.flush_at = Some(now + head.kind.bulk_window());
        }
        DrainVerdict::Continue
    }

    /// Drops all pending work and stops all future flushes.
    ///
    /// Idempotent: returns the number of entries dropped, zero on repeat calls.
    pub fn tear_down(&mut self) -> usize {
        if self.torn_down {
            return 0;
        }
        self.torn_down = true;
        self.flush_at = None;
        self.recent = Default::default();
        let dropped = self.pending.take_all().len();
        info!(destination = %self.key, dropped, "Queue torn down");
        dropped
    }
}
