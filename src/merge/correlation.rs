//! Cross-kind correlation rules.
//!
//! Some events are causally related but arrive separately and in no
//! particular order: banning a bot deletes its managed role, inviting one
//! creates a role, and banning or kicking a member also produces a member
//! leave. These rules stitch such events together so the destination sees one
//! notification instead of two.
//!
//! All matching here is best effort. In particular a bot's managed role is
//! matched by its `tags.bot_id` back-reference when present and otherwise by
//! name equality with the bot's username, which can misfire for two bots
//! sharing a display name.

use std::time::Duration;

use tokio::time::Instant;

use crate::queue::{LogEvent, PendingList};
use crate::types::{
    AUTO_CREATED_ROLE, Annotation, EventKind, EventPayload, MANAGED_ROLE_REMOVED, RoleRef,
};

use super::{MergeWindows, RecentActivity};

/// What a correlation rule did with the incoming event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// The incoming event was folded into a pending entry and must not be queued.
    Absorbed,
    /// The incoming event took information from a pending entry; keep going.
    Enriched,
    NoMatch,
}

type RuleFn =
    fn(&mut PendingList, &RecentActivity, &mut LogEvent, Instant, &MergeWindows) -> Correlation;

/// A named correlation rule.
pub struct CorrelationRule {
    pub name: &'static str,
    pub apply: RuleFn,
}

/// Rules in evaluation order.
pub const RULES: &[CorrelationRule] = &[
    CorrelationRule {
        name: "bot-role-removed",
        apply: bot_role_removed,
    },
    CorrelationRule {
        name: "bot-role-created",
        apply: bot_role_created,
    },
    CorrelationRule {
        name: "leave-after-removal",
        apply: leave_after_removal,
    },
    CorrelationRule {
        name: "removal-after-leave",
        apply: removal_after_leave,
    },
];

/// True if `payload`'s subject is the bot `role` was created for.
fn role_belongs_to(role: &RoleRef, payload: &EventPayload) -> bool {
    let Some(user) = payload.user.as_ref() else {
        return false;
    };
    match role.managed_bot() {
        Some(bot_id) => bot_id == user.id,
        None => payload.subject_is_bot() && !role.name.is_empty() && user.username == role.name,
    }
}

fn within(a: Instant, b: Instant, window: Duration) -> bool {
    let gap = if a > b { a - b } else { b - a };
    gap <= window
}

/// A bot's managed role deleted while a ban/kick of that bot is pending.
fn bot_role_removed(
    pending: &mut PendingList,
    _recent: &RecentActivity,
    event: &mut LogEvent,
    _now: Instant,
    _windows: &MergeWindows,
) -> Correlation {
    if event.kind != EventKind::RoleDelete {
        return Correlation::NoMatch;
    }
    let Some(role) = event.payload.role.as_ref() else {
        return Correlation::NoMatch;
    };
    let target = pending
        .iter_mut()
        .filter(|e| e.kind.is_removal())
        .flat_map(|e| e.payloads_mut())
        .find(|p| role_belongs_to(role, p));
    match target {
        Some(payload) => {
            payload.annotate(Annotation::new(MANAGED_ROLE_REMOVED, role.name.clone()));
            Correlation::Absorbed
        }
        None => Correlation::NoMatch,
    }
}

/// A role created for a bot whose join is still pending.
fn bot_role_created(
    pending: &mut PendingList,
    _recent: &RecentActivity,
    event: &mut LogEvent,
    _now: Instant,
    _windows: &MergeWindows,
) -> Correlation {
    if event.kind != EventKind::RoleCreate {
        return Correlation::NoMatch;
    }
    let Some(role) = event.payload.role.as_ref() else {
        return Correlation::NoMatch;
    };
    let target = pending
        .iter_mut()
        .filter(|e| e.kind == EventKind::MemberJoin)
        .flat_map(|e| e.payloads_mut())
        .find(|p| p.subject_is_bot() && role_belongs_to(role, p));
    match target {
        Some(payload) => {
            payload.annotate(Annotation::new(AUTO_CREATED_ROLE, role.name.clone()));
            Correlation::Absorbed
        }
        None => Correlation::NoMatch,
    }
}

/// A member leave arriving shortly after a ban/kick of the same user.
///
/// The pending ban/kick picks up the leave's join date. If the ban/kick has
/// already been popped, the leave is still absorbed: it is the same removal.
fn leave_after_removal(
    pending: &mut PendingList,
    recent: &RecentActivity,
    event: &mut LogEvent,
    now: Instant,
    windows: &MergeWindows,
) -> Correlation {
    if event.kind != EventKind::MemberLeave {
        return Correlation::NoMatch;
    }
    let Some(user) = event.payload.user_id() else {
        return Correlation::NoMatch;
    };

    let target = pending
        .iter_mut()
        .filter(|e| e.kind.is_removal() && within(e.admitted_at, now, windows.correlation))
        .find(|e| e.payload.user_id() == Some(user));
    if let Some(removal) = target {
        removal.payload.fill_missing_from(&event.payload);
        return Correlation::Absorbed;
    }

    if recent
        .removals
        .get(&user)
        .is_some_and(|at| within(*at, now, windows.correlation))
    {
        return Correlation::Absorbed;
    }
    Correlation::NoMatch
}

/// A ban/kick arriving shortly after a pending leave of the same user.
///
/// The leave is removed from pending and the ban/kick takes its join date.
fn removal_after_leave(
    pending: &mut PendingList,
    _recent: &RecentActivity,
    event: &mut LogEvent,
    now: Instant,
    windows: &MergeWindows,
) -> Correlation {
    if !event.kind.is_removal() {
        return Correlation::NoMatch;
    }
    let Some(user) = event.payload.user_id() else {
        return Correlation::NoMatch;
    };

    let Some(idx) = pending.position(|e| {
        e.kind == EventKind::MemberLeave
            && within(e.admitted_at, now, windows.correlation)
            && e.payloads().any(|p| p.user_id() == Some(user))
    }) else {
        return Correlation::NoMatch;
    };

    let taken = pending
        .get_mut(idx)
        .and_then(|leave| leave.take_payload(|p| p.user_id() == Some(user)));
    let Some((leave_payload, now_empty)) = taken else {
        return Correlation::NoMatch;
    };
    if now_empty {
        pending.remove(idx);
    }
    event.payload.fill_missing_from(&leave_payload);
    Correlation::Enriched
}
