//! Render contract and the default summary renderer.
//!
//! The drain loop hands a renderer one [`Notification`] at a time: either a
//! single event or a whole batch of the same kind with every payload it
//! accumulated. The renderer returns one or more messages; more than one means
//! the transport is called once per message (e.g. an oversized description
//! split into a companion message).
//!
//! Renderers must never panic on a malformed payload. Missing fields are
//! simply left out.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{EventKind, EventPayload, EventPriority, UserRef};

/// Maximum embed description length accepted by the sink.
pub const MAX_DESCRIPTION_LEN: usize = 4096;

/// Number of batch items spelled out in a summary.
pub const BATCH_SAMPLE_SIZE: usize = 3;

/// Localized string lookup for a guild's language.
pub trait Localizer: Send + Sync {
    /// Returns the localized string for `key`, or `key` itself if unknown.
    fn localize(&self, key: &str) -> String;
}

/// Returns every key unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Localizer for Identity {
    fn localize(&self, key: &str) -> String {
        key.to_string()
    }
}

/// Looks keys up in a fixed table, falling back to the key.
#[derive(Debug, Clone, Default)]
pub struct TableLocalizer {
    table: HashMap<String, String>,
}

impl TableLocalizer {
    pub fn new(table: HashMap<String, String>) -> Self {
        TableLocalizer { table }
    }
}

impl Localizer for TableLocalizer {
    fn localize(&self, key: &str) -> String {
        self.table
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}

/// One logical notification: a single event or a batch of one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: EventKind,
    /// Total number of events represented; equals `items.len()`.
    pub batch_count: u32,
    /// Every payload, in admission order.
    pub items: Vec<EventPayload>,
    /// When the earliest event was created.
    pub enqueued_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_batch(&self) -> bool {
        self.batch_count > 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub inline: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// A message ready for the transport. Serializes as a webhook execute body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
}

/// Turns notifications into messages.
pub trait Renderer: Send + Sync + 'static {
    fn render(&self, notification: &Notification, localizer: &dyn Localizer)
    -> Vec<RenderedMessage>;
}

/// Plain embed renderer used when the host does not supply its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryRenderer;

impl Renderer for SummaryRenderer {
    fn render(
        &self,
        notification: &Notification,
        localizer: &dyn Localizer,
    ) -> Vec<RenderedMessage> {
        let embed = if notification.is_batch() {
            batch_embed(notification, localizer)
        } else {
            single_embed(notification, localizer)
        };
        split_oversized(embed)
    }
}

fn color_for(kind: &EventKind) -> u32 {
    match kind.priority() {
        EventPriority::High => 0xE7_4C_3C,
        EventPriority::Medium => 0xF1_C4_0F,
        EventPriority::Low => 0x95_A5_A6,
    }
}

fn describe_user(user: &UserRef) -> String {
    if user.username.is_empty() {
        format!("<@{}>", user.id)
    } else {
        format!("{} ({})", user.username, user.id)
    }
}

fn describe_channel(payload: &EventPayload) -> Option<String> {
    let channel = payload.channel.as_ref()?;
    Some(match &channel.name {
        Some(name) => format!("#{name}"),
        None => format!("<#{}>", channel.id),
    })
}

fn field(localizer: &dyn Localizer, key: &str, value: String) -> EmbedField {
    EmbedField {
        name: localizer.localize(key),
        value,
        inline: true,
    }
}

fn single_embed(notification: &Notification, localizer: &dyn Localizer) -> Embed {
    let mut embed = Embed {
        title: Some(localizer.localize(notification.kind.as_str())),
        color: Some(color_for(&notification.kind)),
        timestamp: Some(notification.enqueued_at.to_rfc3339()),
        ..Embed::default()
    };
    let Some(payload) = notification.items.first() else {
        return embed;
    };

    embed.description = payload
        .message
        .as_ref()
        .and_then(|m| m.content.clone())
        .filter(|c| !c.is_empty());

    if let Some(user) = &payload.user {
        embed.fields.push(field(localizer, "user", describe_user(user)));
    }
    if let Some(moderator) = &payload.moderator {
        embed
            .fields
            .push(field(localizer, "moderator", describe_user(moderator)));
    }
    if let Some(reason) = payload.reason.as_ref().filter(|r| !r.is_empty()) {
        embed.fields.push(field(localizer, "reason", reason.clone()));
    }
    if let Some(channel) = describe_channel(payload) {
        embed.fields.push(field(localizer, "channel", channel));
    }
    if let Some(role) = payload.role.as_ref().filter(|r| !r.name.is_empty()) {
        embed.fields.push(field(localizer, "role", role.name.clone()));
    }
    if let Some(joined) = payload.joined_at() {
        embed
            .fields
            .push(field(localizer, "joined", joined.format("%Y-%m-%d").to_string()));
    }
    for annotation in &payload.annotations {
        embed.fields.push(EmbedField {
            name: localizer.localize(&annotation.name),
            value: annotation.value.clone(),
            inline: false,
        });
    }
    embed
}

/// Most common value, ties broken by first occurrence.
fn majority<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }
    let best = counts.iter().map(|(_, n)| *n).max()?;
    counts.into_iter().find(|(_, n)| *n == best).map(|(v, _)| v)
}

fn sample_line(payload: &EventPayload) -> String {
    let content = payload
        .message
        .as_ref()
        .and_then(|m| m.content.as_deref())
        .filter(|c| !c.is_empty());
    match (&payload.user, content) {
        (Some(user), Some(content)) => format!("{}: {}", describe_user(user), content),
        (Some(user), None) => describe_user(user),
        (None, Some(content)) => content.to_string(),
        (None, None) => describe_channel(payload).unwrap_or_else(|| "-".to_string()),
    }
}

fn batch_embed(notification: &Notification, localizer: &dyn Localizer) -> Embed {
    let items = &notification.items;
    let mut lines: Vec<String> = items
        .iter()
        .take(BATCH_SAMPLE_SIZE)
        .map(|p| format!("- {}", sample_line(p)))
        .collect();
    let rest = items.len().saturating_sub(BATCH_SAMPLE_SIZE);
    if rest > 0 {
        lines.push(format!("+{} {}", rest, localizer.localize("more")));
    }

    let mut embed = Embed {
        title: Some(format!(
            "{} \u{d7} {}",
            notification.batch_count,
            localizer.localize(notification.kind.as_str())
        )),
        description: Some(lines.join("\n")),
        color: Some(color_for(&notification.kind)),
        timestamp: Some(notification.enqueued_at.to_rfc3339()),
        ..Embed::default()
    };

    let mut channels: Vec<(String, usize)> = Vec::new();
    for channel in items.iter().filter_map(describe_channel) {
        match channels.iter_mut().find(|(c, _)| *c == channel) {
            Some((_, n)) => *n += 1,
            None => channels.push((channel, 1)),
        }
    }
    if !channels.is_empty() {
        let value = channels
            .iter()
            .map(|(c, n)| format!("{c} \u{d7}{n}"))
            .collect::<Vec<_>>()
            .join(", ");
        embed.fields.push(field(localizer, "channels", value));
    }

    let moderators: Vec<String> = items
        .iter()
        .filter_map(|p| p.moderator.as_ref().map(describe_user))
        .collect();
    if let Some(moderator) = majority(moderators.iter().map(String::as_str)) {
        embed
            .fields
            .push(field(localizer, "moderator", moderator.to_string()));
    }
    if let Some(reason) = majority(
        items
            .iter()
            .filter_map(|p| p.reason.as_deref())
            .filter(|r| !r.is_empty()),
    ) {
        embed.fields.push(field(localizer, "reason", reason.to_string()));
    }
    embed
}

/// Splits `s` into pieces of at most `max` bytes on char boundaries.
fn split_at_boundaries(s: &str, max: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for ch in s.chars() {
        if !current.is_empty() && current.len() + ch.len_utf8() > max {
            pieces.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn split_oversized(mut embed: Embed) -> Vec<RenderedMessage> {
    let Some(description) = embed
        .description
        .take_if(|d| d.len() > MAX_DESCRIPTION_LEN)
    else {
        return vec![RenderedMessage {
            content: None,
            embeds: vec![embed],
        }];
    };

    let mut pieces = split_at_boundaries(&description, MAX_DESCRIPTION_LEN).into_iter();
    embed.description = pieces.next();
    let color = embed.color;
    let mut messages = vec![RenderedMessage {
        content: None,
        embeds: vec![embed],
    }];
    messages.extend(pieces.map(|piece| RenderedMessage {
        content: None,
        embeds: vec![Embed {
            description: Some(piece),
            color,
            ..Embed::default()
        }],
    }));
    messages
}
