//! Duplicate-ban suppression.
//!
//! A ban can reach the engine twice: once from the direct ban action and once
//! from the member-removal event that audit-log correlation later classifies
//! as a ban. Both arrive as `memberBan` for the same guild and user within a
//! few seconds. This cache lets the first one through and drops the rest.
//!
//! Entries expire after a TTL (10s by default). Expiry is checked lazily on
//! lookup; [`BanSuppressor::sweep`] removes stale entries so the map does not
//! grow with every ban ever seen.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{GuildId, UserId};

/// Default lifetime of a suppression entry.
pub const DEFAULT_BAN_TTL: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct BanSuppressor {
    ttl: Duration,
    entries: HashMap<(GuildId, UserId), Instant>,
}

impl BanSuppressor {
    pub fn new(ttl: Duration) -> Self {
        BanSuppressor {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// True if a ban for this guild and user was marked less than `ttl` ago.
    pub fn seen(&mut self, guild: GuildId, user: UserId, now: Instant) -> bool {
        match self.entries.get(&(guild, user)) {
            Some(at) if now.saturating_duration_since(*at) < self.ttl => true,
            Some(_) => {
                self.entries.remove(&(guild, user));
                false
            }
            None => false,
        }
    }

    pub fn mark(&mut self, guild: GuildId, user: UserId, now: Instant) {
        self.entries.insert((guild, user), now);
    }

    /// Removes the mark made at `marked_at`, if it is still the current one.
    pub fn unmark(&mut self, guild: GuildId, user: UserId, marked_at: Instant) {
        if self.entries.get(&(guild, user)) == Some(&marked_at) {
            self.entries.remove(&(guild, user));
        }
    }

    /// Marks the ban and returns true if it is a duplicate.
    ///
    /// A duplicate does not refresh the entry: the window is measured from the
    /// first ban.
    pub fn check_and_mark(&mut self, guild: GuildId, user: UserId, now: Instant) -> bool {
        if self.seen(guild, user, now) {
            return true;
        }
        self.mark(guild, user, now);
        false
    }

    /// Removes expired entries and returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, at| now.saturating_duration_since(*at) < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for BanSuppressor {
    fn default() -> Self {
        Self::new(DEFAULT_BAN_TTL)
    }
}
