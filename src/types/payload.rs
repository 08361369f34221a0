//! Event payloads.
//!
//! The engine treats payloads as opaque apart from the handful of fields the
//! merge rules inspect: the subject user, the moderator and reason filled in by
//! upstream audit-log correlation, the member's join date, and the role that a
//! bot integration creates or loses. Everything else is kept verbatim in
//! `extra` and handed to the renderer untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::{ChannelId, RoleId, UserId};

/// A reference to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

impl UserRef {
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        UserRef {
            id: id.into(),
            username: username.into(),
            bot: false,
        }
    }

    pub fn bot(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        UserRef {
            bot: true,
            ..UserRef::new(id, username)
        }
    }
}

/// Guild membership details captured when the event was observed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}

/// Back-references on a managed role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTags {
    /// The bot this role was created for, if it is an integration-managed role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RoleId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: Option<RoleTags>,
}

impl RoleRef {
    pub fn named(name: impl Into<String>) -> Self {
        RoleRef {
            id: None,
            name: name.into(),
            tags: None,
        }
    }

    /// The bot user this role is managed for, when the back-reference is present.
    pub fn managed_bot(&self) -> Option<UserId> {
        self.tags.as_ref().and_then(|t| t.bot_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub id: ChannelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<UserRef>,
}

/// An extra name/value line attached to an event by cross-kind correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    pub value: String,
}

impl Annotation {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Annotation {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Annotation name used when a bot's managed role is folded into its join.
pub const AUTO_CREATED_ROLE: &str = "auto-created role";

/// Annotation name used when a bot's managed role is folded into its ban/kick.
pub const MANAGED_ROLE_REMOVED: &str = "managed role removed";

/// The payload of a log event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderator: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<MemberInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<RoleRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    /// Kind-specific fields the engine never inspects.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventPayload {
    pub fn for_user(user: UserRef) -> Self {
        EventPayload {
            user: Some(user),
            ..Default::default()
        }
    }

    pub fn with_moderator(mut self, moderator: UserRef) -> Self {
        self.moderator = Some(moderator);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_joined_at(mut self, joined_at: DateTime<Utc>) -> Self {
        self.member.get_or_insert_with(MemberInfo::default).joined_at = Some(joined_at);
        self
    }

    pub fn with_role(mut self, role: RoleRef) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_channel(mut self, channel: ChannelRef) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user.as_ref().map(|u| u.id)
    }

    /// True if the subject is a bot, either via the user record or a
    /// top-level `bot` flag some observers send instead.
    pub fn subject_is_bot(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.bot)
            || self.extra.get("bot").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn joined_at(&self) -> Option<DateTime<Utc>> {
        self.member.as_ref().and_then(|m| m.joined_at)
    }

    pub fn annotate(&mut self, annotation: Annotation) {
        if !self.annotations.contains(&annotation) {
            self.annotations.push(annotation);
        }
    }

    /// Copies the informative fields `other` has and `self` lacks.
    ///
    /// Only moderator, reason and member details are merged; the subject and
    /// everything in `extra` stay as the first observer recorded them.
    /// Returns true if anything changed.
    pub fn fill_missing_from(&mut self, other: &EventPayload) -> bool {
        let mut changed = false;
        if self.moderator.is_none() && other.moderator.is_some() {
            self.moderator = other.moderator.clone();
            changed = true;
        }
        if self.reason.is_none() && other.reason.is_some() {
            self.reason = other.reason.clone();
            changed = true;
        }
        if let Some(theirs) = &other.member {
            if self.member.is_none() {
                self.member = Some(theirs.clone());
                changed = true;
            } else if let Some(ours) = self.member.as_mut() {
                if ours.joined_at.is_none() && theirs.joined_at.is_some() {
                    ours.joined_at = theirs.joined_at;
                    changed = true;
                }
                if ours.nickname.is_none() && theirs.nickname.is_some() {
                    ours.nickname = theirs.nickname.clone();
                    changed = true;
                }
            }
        }
        changed
    }
}
