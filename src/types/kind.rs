//! Event kinds and their static classification.
//!
//! Each kind carries two derived properties, both fixed per kind:
//!
//! - a priority, which decides where a new pending entry is inserted
//!   (`High` floats to the front of the destination's pending list);
//! - whether it is batchable, i.e. whether several instances arriving inside
//!   one flush cycle may be folded into a single counted entry.
//!
//! Kinds the engine does not know about are carried through as
//! [`EventKind::Custom`] with low priority and no batching.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ids::LogCategory;

/// Flush delay (and bulk-coalescing window) for message deletions.
pub const MESSAGE_DELETE_WINDOW: Duration = Duration::from_millis(2750);

/// Flush delay for every other kind.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(1650);

/// Event priority level.
///
/// Ordering follows importance: `High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    #[default]
    Low = 0,
    Medium = 1,
    High = 2,
}

/// Discriminator of a log event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    MemberBan,
    MemberUnban,
    MemberKick,
    MemberTimeout,
    MemberTimeoutRemove,
    MemberJoin,
    MemberLeave,
    MemberRoleUpdate,
    MemberNicknameUpdate,
    MessageDelete,
    MessageBulkDelete,
    MessageUpdate,
    RoleCreate,
    RoleDelete,
    RoleUpdate,
    ChannelCreate,
    ChannelDelete,
    ChannelUpdate,
    InviteCreate,
    InviteDelete,
    VoiceJoin,
    VoiceLeave,
    VoiceMove,
    GuildUpdate,
    EmojiUpdate,
    /// A kind this engine has no rules for.
    Custom(String),
}

const NAMED: &[(EventKind, &str)] = &[
    (EventKind::MemberBan, "memberBan"),
    (EventKind::MemberUnban, "memberUnban"),
    (EventKind::MemberKick, "memberKick"),
    (EventKind::MemberTimeout, "memberTimeout"),
    (EventKind::MemberTimeoutRemove, "memberTimeoutRemove"),
    (EventKind::MemberJoin, "memberJoin"),
    (EventKind::MemberLeave, "memberLeave"),
    (EventKind::MemberRoleUpdate, "memberRoleUpdate"),
    (EventKind::MemberNicknameUpdate, "memberNicknameUpdate"),
    (EventKind::MessageDelete, "messageDelete"),
    (EventKind::MessageBulkDelete, "messageBulkDelete"),
    (EventKind::MessageUpdate, "messageUpdate"),
    (EventKind::RoleCreate, "roleCreate"),
    (EventKind::RoleDelete, "roleDelete"),
    (EventKind::RoleUpdate, "roleUpdate"),
    (EventKind::ChannelCreate, "channelCreate"),
    (EventKind::ChannelDelete, "channelDelete"),
    (EventKind::ChannelUpdate, "channelUpdate"),
    (EventKind::InviteCreate, "inviteCreate"),
    (EventKind::InviteDelete, "inviteDelete"),
    (EventKind::VoiceJoin, "voiceJoin"),
    (EventKind::VoiceLeave, "voiceLeave"),
    (EventKind::VoiceMove, "voiceMove"),
    (EventKind::GuildUpdate, "guildUpdate"),
    (EventKind::EmojiUpdate, "emojiUpdate"),
];

impl EventKind {
    /// Parses a kind from its wire name. Unknown names become `Custom`.
    pub fn from_name(name: &str) -> Self {
        NAMED
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(kind, _)| kind.clone())
            .unwrap_or_else(|| EventKind::Custom(name.to_string()))
    }

    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Custom(name) => name,
            known => NAMED
                .iter()
                .find(|(kind, _)| kind == known)
                .map(|(_, name)| *name)
                .unwrap_or("custom"),
        }
    }

    /// Static priority table.
    pub fn priority(&self) -> EventPriority {
        match self {
            EventKind::MemberBan
            | EventKind::MemberKick
            | EventKind::MemberTimeout
            | EventKind::RoleDelete
            | EventKind::ChannelDelete
            | EventKind::MessageBulkDelete => EventPriority::High,

            EventKind::MemberUnban
            | EventKind::MemberTimeoutRemove
            | EventKind::MemberJoin
            | EventKind::MemberLeave
            | EventKind::MessageDelete
            | EventKind::RoleCreate
            | EventKind::ChannelCreate
            | EventKind::GuildUpdate => EventPriority::Medium,

            EventKind::MemberRoleUpdate
            | EventKind::MemberNicknameUpdate
            | EventKind::MessageUpdate
            | EventKind::RoleUpdate
            | EventKind::ChannelUpdate
            | EventKind::InviteCreate
            | EventKind::InviteDelete
            | EventKind::VoiceJoin
            | EventKind::VoiceLeave
            | EventKind::VoiceMove
            | EventKind::EmojiUpdate
            | EventKind::Custom(_) => EventPriority::Low,
        }
    }

    /// Static batchable set: only these kinds may be folded into a running count.
    pub fn is_batchable(&self) -> bool {
        matches!(
            self,
            EventKind::MessageDelete
                | EventKind::MessageUpdate
                | EventKind::MemberJoin
                | EventKind::MemberLeave
                | EventKind::MemberRoleUpdate
                | EventKind::MemberNicknameUpdate
                | EventKind::VoiceJoin
                | EventKind::VoiceLeave
                | EventKind::VoiceMove
        )
    }

    /// True for kinds that remove a member as a moderation action.
    pub fn is_removal(&self) -> bool {
        matches!(self, EventKind::MemberBan | EventKind::MemberKick)
    }

    /// Flush delay after admitting this kind; also the bulk-coalescing window.
    pub fn bulk_window(&self) -> Duration {
        match self {
            EventKind::MessageDelete => MESSAGE_DELETE_WINDOW,
            _ => DEFAULT_WINDOW,
        }
    }

    /// The category this kind is filed under when the caller does not say.
    pub fn default_category(&self) -> LogCategory {
        match self {
            EventKind::MemberBan
            | EventKind::MemberUnban
            | EventKind::MemberKick
            | EventKind::MemberTimeout
            | EventKind::MemberTimeoutRemove => LogCategory::Moderation,
            EventKind::MemberJoin
            | EventKind::MemberLeave
            | EventKind::MemberRoleUpdate
            | EventKind::MemberNicknameUpdate => LogCategory::Members,
            EventKind::MessageDelete | EventKind::MessageBulkDelete | EventKind::MessageUpdate => {
                LogCategory::Messages
            }
            EventKind::RoleCreate | EventKind::RoleDelete | EventKind::RoleUpdate => {
                LogCategory::Roles
            }
            EventKind::ChannelCreate | EventKind::ChannelDelete | EventKind::ChannelUpdate => {
                LogCategory::Channels
            }
            EventKind::InviteCreate | EventKind::InviteDelete => LogCategory::Invites,
            EventKind::VoiceJoin | EventKind::VoiceLeave | EventKind::VoiceMove => {
                LogCategory::Voice
            }
            EventKind::GuildUpdate | EventKind::EmojiUpdate | EventKind::Custom(_) => {
                LogCategory::Server
            }
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        EventKind::from_name(&s)
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        EventKind::from_name(s)
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}
