//! Core domain types for the log relay.
//!
//! Identifiers, event kinds with their static priority/batching tables, and the
//! payload structs the merge rules inspect.

pub mod ids;
pub mod kind;
pub mod payload;

pub use ids::{
    ChannelId, DestinationId, DestinationKey, GuildId, LogCategory, RoleId, UnknownCategory,
    UserId,
};
pub use kind::{DEFAULT_WINDOW, EventKind, EventPriority, MESSAGE_DELETE_WINDOW};
pub use payload::{
    AUTO_CREATED_ROLE, Annotation, ChannelRef, EventPayload, MANAGED_ROLE_REMOVED, MemberInfo,
    MessageRef, RoleRef, RoleTags, UserRef,
};
