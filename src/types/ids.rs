//! Newtype wrappers for domain identifiers.
//!
//! Guild, user, role and channel IDs are all Discord-style snowflakes, so the
//! newtypes exist mostly to stop one being passed where another is expected.
//! [`DestinationKey`] is the unit of ordering and rate limiting: every pending
//! event belongs to exactly one key, and each key gets its own worker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                $name(n)
            }
        }
    };
}

snowflake!(
    /// A guild (server) identifier.
    GuildId
);
snowflake!(
    /// A user identifier. Bots are users too.
    UserId
);
snowflake!(
    /// A role identifier.
    RoleId
);
snowflake!(
    /// A channel identifier.
    ChannelId
);

/// Identifier of a delivery target, as returned by the destination resolver
/// (for webhook destinations this is the webhook ID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(pub String);

impl DestinationId {
    pub fn new(s: impl Into<String>) -> Self {
        DestinationId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DestinationId {
    fn from(s: &str) -> Self {
        DestinationId(s.to_string())
    }
}

impl From<String> for DestinationId {
    fn from(s: String) -> Self {
        DestinationId(s)
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The log category an event is filed under. Each guild maps every category
/// to at most one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Moderation,
    Members,
    Messages,
    Roles,
    Channels,
    Server,
    Voice,
    Invites,
}

impl LogCategory {
    pub const ALL: [LogCategory; 8] = [
        LogCategory::Moderation,
        LogCategory::Members,
        LogCategory::Messages,
        LogCategory::Roles,
        LogCategory::Channels,
        LogCategory::Server,
        LogCategory::Voice,
        LogCategory::Invites,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Moderation => "moderation",
            LogCategory::Members => "members",
            LogCategory::Messages => "messages",
            LogCategory::Roles => "roles",
            LogCategory::Channels => "channels",
            LogCategory::Server => "server",
            LogCategory::Voice => "voice",
            LogCategory::Invites => "invites",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown log category name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log category: {0:?}")]
pub struct UnknownCategory(pub String);

impl FromStr for LogCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Identifies a delivery target: (guild, category, destination).
///
/// Two keys with the same guild and category but different destination IDs
/// are different targets; this happens when a guild reconfigures a category
/// after the old webhook was invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationKey {
    pub guild_id: GuildId,
    pub category: LogCategory,
    pub destination_id: DestinationId,
}

impl DestinationKey {
    pub fn new(
        guild_id: GuildId,
        category: LogCategory,
        destination_id: impl Into<DestinationId>,
    ) -> Self {
        DestinationKey {
            guild_id,
            category,
            destination_id: destination_id.into(),
        }
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.guild_id, self.category, self.destination_id
        )
    }
}
