//! Shared test fakes and arbitrary generators for property-based testing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use tokio::time::Instant;

use crate::delivery::{
    Credentials, DeliveryError, DeliveryTarget, Identity, Localizer, RenderedMessage, Transport,
};
use crate::destinations::{self, DestinationResolver, ResolveError, ResolvedDestination};
use crate::types::{DestinationId, DestinationKey, EventKind, GuildId, LogCategory};

pub fn arb_event_kind() -> impl Strategy<Value = EventKind> {
    prop_oneof![
        Just(EventKind::MemberBan),
        Just(EventKind::MemberKick),
        Just(EventKind::MemberJoin),
        Just(EventKind::MessageDelete),
        Just(EventKind::InviteCreate),
        Just(EventKind::RoleUpdate),
        Just(EventKind::ChannelDelete),
        "[a-z]{3,12}".prop_map(|s| EventKind::Custom(format!("x{s}"))),
    ]
}

/// A delivery target for guild 1, moderation, with an identity localizer.
pub fn target(destination: &str) -> DeliveryTarget {
    DeliveryTarget {
        key: DestinationKey::new(GuildId(1), LogCategory::Moderation, destination),
        credentials: Credentials::new(format!("https://hooks.test/{destination}")),
        localizer: Arc::new(Identity),
    }
}

/// A scripted transport response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    Ok,
    RateLimited(Duration),
    Invalid,
    Other,
}

#[derive(Debug, Clone)]
pub struct Attempt {
    pub url: String,
    pub message: RenderedMessage,
    pub at: Instant,
    pub response: Scripted,
}

/// Records every send and answers from a script, then `Ok` once it runs out.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    script: Mutex<VecDeque<Scripted>>,
    attempts: Mutex<Vec<Attempt>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, responses: impl IntoIterator<Item = Scripted>) {
        self.script.lock().unwrap().extend(responses);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn attempt_log(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<RenderedMessage> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.response == Scripted::Ok)
            .map(|a| a.message.clone())
            .collect()
    }

    /// Titles of the first embed of every delivered message.
    pub fn delivered_titles(&self) -> Vec<String> {
        self.delivered()
            .iter()
            .filter_map(|m| m.embeds.first().and_then(|e| e.title.clone()))
            .collect()
    }
}

impl Transport for RecordingTransport {
    async fn send(
        &self,
        credentials: &Credentials,
        message: &RenderedMessage,
    ) -> Result<(), DeliveryError> {
        let response = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Scripted::Ok);
        self.attempts.lock().unwrap().push(Attempt {
            url: credentials.url.clone(),
            message: message.clone(),
            at: Instant::now(),
            response,
        });
        match response {
            Scripted::Ok => Ok(()),
            Scripted::RateLimited(retry_after) => Err(DeliveryError::rate_limited(retry_after)),
            Scripted::Invalid => Err(DeliveryError::invalid(Some(404), "Unknown Webhook")),
            Scripted::Other => Err(DeliveryError::other(Some(500), "boom")),
        }
    }
}

/// Resolver backed by an in-memory table that tests can change on the fly.
#[derive(Default)]
pub struct FixedResolver {
    table: Mutex<HashMap<(GuildId, LogCategory), ResolvedDestination>>,
    resolves: AtomicUsize,
    failing: AtomicBool,
    invalidated: Mutex<Vec<DestinationKey>>,
}

impl FixedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, guild: GuildId, category: LogCategory, id: &str) -> Self {
        self.set(guild, category, id);
        self
    }

    pub fn set(&self, guild: GuildId, category: LogCategory, id: &str) {
        let localizer: Arc<dyn Localizer> = Arc::new(Identity);
        self.table.lock().unwrap().insert(
            (guild, category),
            ResolvedDestination {
                id: DestinationId::new(id),
                credentials: Credentials::new(format!("https://hooks.test/{id}")),
                localizer,
            },
        );
    }

    /// While set, every lookup fails with a backend error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    pub fn invalidated(&self) -> Vec<DestinationKey> {
        self.invalidated.lock().unwrap().clone()
    }
}

impl DestinationResolver for FixedResolver {
    async fn resolve(
        &self,
        guild: GuildId,
        category: LogCategory,
    ) -> destinations::Result<Option<ResolvedDestination>> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ResolveError::Backend("config store unavailable".into()));
        }
        Ok(self.table.lock().unwrap().get(&(guild, category)).cloned())
    }

    async fn invalidate(&self, guild: GuildId, category: LogCategory, destination: &DestinationId) {
        let key = DestinationKey::new(guild, category, destination.clone());
        self.invalidated.lock().unwrap().push(key);
        let mut table = self.table.lock().unwrap();
        if table
            .get(&(guild, category))
            .is_some_and(|d| &d.id == destination)
        {
            table.remove(&(guild, category));
        }
    }
}
