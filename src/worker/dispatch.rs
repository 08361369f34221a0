//! Ingress routing to per-destination workers.
//!
//! The dispatcher is the engine's single entry point. It applies duplicate-ban
//! suppression, resolves `(guild, category)` to a destination, and forwards
//! the event to that destination's worker, creating the worker on demand.
//! Different destinations drain concurrently; events for one destination are
//! serialized by its worker.
//!
//! ```text
//!                                       ┌──────────────────────────┐
//!                                  ┌──► │ destination A worker     │ ──► transport
//! ┌──────────┐    ┌────────────┐   │    └──────────────────────────┘
//! │ ingress  │ ─► │ ban cache  │ ──┤
//! │ (caller) │    │ + routing  │   │    ┌──────────────────────────┐
//! └──────────┘    └────────────┘   └──► │ destination B worker     │ ──► transport
//!                                       └──────────────────────────┘
//! ```
//!
//! # Worker Lifecycle
//!
//! A route is resolved once and cached together with its worker handle. When
//! a worker exits because its destination is permanently invalid, the
//! resolver is told, and the route and handle are forgotten; the next event
//! for that `(guild, category)` resolves afresh. Each handle carries a
//! generation number so a late cleanup never removes a newer worker for the
//! same key.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::delivery::{DeliveryTarget, Renderer, Transport};
use crate::destinations::{DestinationResolver, ResolveError, ResolvedDestination};
use crate::queue::{DedupKey, LogEvent};
use crate::suppression::BanSuppressor;
use crate::types::{DestinationKey, EventKind, EventPayload, GuildId, LogCategory};

use super::config::EngineConfig;
use super::message::WorkerMessage;
use super::worker::{DestinationWorker, WorkerExit};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The destination's worker stopped accepting messages, even after the
    /// route was re-resolved.
    #[error("failed to send message to worker: channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// What ingress did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressOutcome {
    /// Handed to the destination's worker.
    Routed(DestinationKey),
    /// A duplicate `memberBan` inside the suppression window.
    Suppressed,
    /// Logging is disabled for this guild and category.
    Disabled,
}

struct WorkerHandle {
    tx: mpsc::Sender<WorkerMessage>,
    task: JoinHandle<()>,
    cancel: CancellationToken,
    generation: u64,
}

#[derive(Default)]
struct Registry {
    workers: HashMap<DestinationKey, WorkerHandle>,
    routes: HashMap<(GuildId, LogCategory), DestinationKey>,
    next_generation: u64,
}

impl Registry {
    fn sender(&self, guild: GuildId, category: LogCategory) -> Option<Route> {
        let key = self.routes.get(&(guild, category))?;
        let handle = self.workers.get(key)?;
        Some(Route {
            key: key.clone(),
            tx: handle.tx.clone(),
            generation: handle.generation,
        })
    }
}

struct Route {
    key: DestinationKey,
    tx: mpsc::Sender<WorkerMessage>,
    generation: u64,
}

struct Inner<D, R, T> {
    config: EngineConfig,
    resolver: Arc<D>,
    renderer: Arc<R>,
    transport: Arc<T>,
    registry: RwLock<Registry>,
    bans: Mutex<BanSuppressor>,
    shutdown: CancellationToken,
}

/// Routes events to per-destination workers.
///
/// Cheap to clone; clones share the same workers and caches.
pub struct Dispatcher<D, R, T> {
    inner: Arc<Inner<D, R, T>>,
}

impl<D, R, T> Clone for Dispatcher<D, R, T> {
    fn clone(&self) -> Self {
        Dispatcher {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D, R, T> Inner<D, R, T> {
    /// Removes the worker for `key` and every route to it. With a
    /// `generation`, a newer worker registered under the same key is left
    /// alone.
    async fn forget(&self, key: &DestinationKey, generation: Option<u64>) -> Option<WorkerHandle> {
        let mut registry = self.registry.write().await;
        let current = registry.workers.get(key).map(|h| h.generation);
        if let (Some(current), Some(expected)) = (current, generation)
            && current != expected
        {
            return None;
        }
        let handle = registry.workers.remove(key);
        registry.routes.retain(|_, routed| routed != key);
        debug!(destination = %key, "Forgot destination");
        handle
    }
}

impl<D, R, T> Dispatcher<D, R, T>
where
    D: DestinationResolver,
    R: Renderer,
    T: Transport,
{
    pub fn new(
        config: EngineConfig,
        resolver: Arc<D>,
        renderer: Arc<R>,
        transport: Arc<T>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        Self::new_with_shutdown(config, resolver, renderer, transport, shutdown)
    }

    pub fn new_with_shutdown(
        config: EngineConfig,
        resolver: Arc<D>,
        renderer: Arc<R>,
        transport: Arc<T>,
        shutdown: CancellationToken,
    ) -> Self {
        info!(
            max_pending = config.max_pending,
            chunk_size = config.chunk_size,
            max_backoff_ms = config.max_backoff.as_millis() as u64,
            "Creating dispatcher"
        );
        let bans = BanSuppressor::new(config.ban_ttl);
        Dispatcher {
            inner: Arc::new(Inner {
                config,
                resolver,
                renderer,
                transport,
                registry: RwLock::new(Registry::default()),
                bans: Mutex::new(bans),
                shutdown,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Submits one event.
    ///
    /// The event is stamped with the current time, checked against the
    /// duplicate-ban cache, and handed to the worker for its destination.
    /// Whether it is then queued, merged or dropped is up to the worker.
    #[instrument(
        skip(self, payload, dedup_key),
        fields(guild = %guild, category = %category, kind = %kind)
    )]
    pub async fn log_event(
        &self,
        guild: GuildId,
        category: LogCategory,
        kind: EventKind,
        payload: EventPayload,
        dedup_key: Option<DedupKey>,
    ) -> Result<IngressOutcome> {
        let now = Instant::now();

        let banned = if kind == EventKind::MemberBan {
            payload.user_id()
        } else {
            None
        };
        if let Some(user) = banned
            && self.inner.bans.lock().await.check_and_mark(guild, user, now)
        {
            debug!(user = %user, "Duplicate ban suppressed");
            return Ok(IngressOutcome::Suppressed);
        }

        let event = LogEvent::new(kind, payload, dedup_key, now);
        let result = self.send_event(guild, category, event).await;
        // The ban never reached a worker: let the other upstream path through.
        if result.is_err()
            && let Some(user) = banned
        {
            debug!(user = %user, "Routing failed, clearing ban mark");
            self.inner.bans.lock().await.unmark(guild, user, now);
        }
        result
    }

    async fn send_event(
        &self,
        guild: GuildId,
        category: LogCategory,
        event: LogEvent,
    ) -> Result<IngressOutcome> {
        let mut message = WorkerMessage::Event(event);

        // A closed channel means the worker exited and its cleanup has not run
        // yet: forget it and resolve once more.
        for _ in 0..2 {
            let Some(route) = self.route(guild, category).await? else {
                trace!("Logging disabled for category");
                return Ok(IngressOutcome::Disabled);
            };
            match route.tx.send(message).await {
                Ok(()) => return Ok(IngressOutcome::Routed(route.key)),
                Err(SendError(returned)) => {
                    warn!(destination = %route.key, "Worker channel closed, re-resolving");
                    self.inner.forget(&route.key, Some(route.generation)).await;
                    message = returned;
                }
            }
        }
        Err(DispatchError::ChannelClosed)
    }

    /// Requests an immediate drain for `(guild, category)`.
    ///
    /// Returns false if no worker is running for it. The drain still waits
    /// out any rate-limit cooldown.
    #[instrument(skip(self), fields(guild = %guild, category = %category))]
    pub async fn flush(&self, guild: GuildId, category: LogCategory) -> Result<bool> {
        let route = self.inner.registry.read().await.sender(guild, category);
        let Some(route) = route else {
            return Ok(false);
        };
        route
            .tx
            .send(WorkerMessage::Flush)
            .await
            .map_err(|_| DispatchError::ChannelClosed)?;
        Ok(true)
    }

    /// Stops the worker for `key` and forgets its route.
    ///
    /// The worker still makes its final drain.
    pub async fn remove_worker(&self, key: &DestinationKey) -> bool {
        match self.inner.forget(key, None).await {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn worker_count(&self) -> usize {
        self.inner.registry.read().await.workers.len()
    }

    pub async fn has_route(&self, guild: GuildId, category: LogCategory) -> bool {
        self.inner
            .registry
            .read()
            .await
            .routes
            .contains_key(&(guild, category))
    }

    /// Spawns the periodic ban-cache sweep. It stops on shutdown.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let interval = inner.config.sweep_interval;
            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let swept = inner.bans.lock().await.sweep(Instant::now());
                        if swept > 0 {
                            trace!(swept, "Swept ban cache");
                        }
                    }
                }
            }
        })
    }

    /// Cancels every worker and waits for their final drains.
    pub async fn shutdown_all(&self) {
        info!("Shutting down all workers");
        self.inner.shutdown.cancel();

        let handles: Vec<(DestinationKey, WorkerHandle)> = {
            let mut registry = self.inner.registry.write().await;
            registry.routes.clear();
            registry.workers.drain().collect()
        };
        for (key, handle) in handles {
            trace!(destination = %key, "Waiting for worker");
            if let Err(e) = handle.task.await {
                error!(destination = %key, error = %e, "Worker task failed");
            }
        }
        info!("All workers stopped");
    }

    /// Finds the worker for `(guild, category)`, resolving and spawning one if
    /// needed. `None` means logging is disabled.
    async fn route(&self, guild: GuildId, category: LogCategory) -> Result<Option<Route>> {
        if let Some(route) = self.inner.registry.read().await.sender(guild, category) {
            return Ok(Some(route));
        }

        let Some(resolved) = self.inner.resolver.resolve(guild, category).await? else {
            return Ok(None);
        };

        let mut registry = self.inner.registry.write().await;
        // Double-check after acquiring the write lock.
        if let Some(route) = registry.sender(guild, category) {
            return Ok(Some(route));
        }

        let key = DestinationKey::new(guild, category, resolved.id.clone());
        let generation = registry.next_generation;
        registry.next_generation += 1;
        let handle = self.spawn_worker(key.clone(), resolved, generation);
        let route = Route {
            key: key.clone(),
            tx: handle.tx.clone(),
            generation,
        };
        registry.workers.insert(key.clone(), handle);
        registry.routes.insert((guild, category), key);
        Ok(Some(route))
    }

    fn spawn_worker(
        &self,
        key: DestinationKey,
        resolved: ResolvedDestination,
        generation: u64,
    ) -> WorkerHandle {
        debug!(destination = %key, generation, "Spawning destination worker");
        let target = DeliveryTarget {
            key: key.clone(),
            credentials: resolved.credentials,
            localizer: resolved.localizer,
        };
        let worker = DestinationWorker::new(
            target,
            self.inner.config.queue_config(),
            Arc::clone(&self.inner.renderer),
            Arc::clone(&self.inner.transport),
        );

        let (tx, rx) = mpsc::channel(self.inner.config.channel_buffer);
        // The handle and the task share one token so remove_worker cancels
        // the right worker.
        let cancel = self.inner.shutdown.child_token();
        let task_cancel = cancel.clone();
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            if worker.run(rx, task_cancel).await == WorkerExit::Invalidated {
                inner
                    .resolver
                    .invalidate(key.guild_id, key.category, &key.destination_id)
                    .await;
                inner.forget(&key, Some(generation)).await;
            }
        });

        WorkerHandle {
            tx,
            task,
            cancel,
            generation,
        }
    }
}
