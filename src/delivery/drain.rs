//! Draining one popped chunk: partition, render, send.
//!
//! The drain owns its chunk for its whole lifetime and reports back what
//! happened to it. It never touches the destination's queue directly; the
//! worker applies the [`DrainReport`] once the drain has finished.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::queue::LogEvent;
use crate::types::{DestinationKey, EventKind};

use super::render::{Localizer, Notification, Renderer};
use super::transport::{Credentials, DeliveryErrorKind, Transport};

/// Everything a drain needs to know about its destination.
#[derive(Clone)]
pub struct DeliveryTarget {
    pub key: DestinationKey,
    pub credentials: Credentials,
    pub localizer: Arc<dyn Localizer>,
}

impl std::fmt::Debug for DeliveryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryTarget")
            .field("key", &self.key)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every notification was either delivered or dropped.
    Completed,
    /// Stopped at a rate limit; `requeue` holds what was left.
    RateLimited { retry_after: Duration },
    /// The destination is permanently invalid.
    Invalidated,
}

/// Result of draining one chunk.
#[derive(Debug)]
pub struct DrainReport {
    /// Notifications delivered in full.
    pub delivered: usize,
    /// Notifications dropped (render produced nothing, or a non-retryable error).
    pub dropped: usize,
    /// Entries to put back at the front of the pending list, in order.
    pub requeue: Vec<LogEvent>,
    pub outcome: DrainOutcome,
}

/// A notification together with the pending entries it was built from.
#[derive(Debug)]
pub struct Group {
    pub notification: Notification,
    pub sources: Vec<LogEvent>,
}

/// Splits a chunk into notifications.
///
/// Entries of the same batchable kind are combined into one notification
/// whose items are every payload those entries accumulated. Everything else
/// becomes its own notification. Notifications keep the position of their
/// first entry, so the chunk's priority order carries over.
pub fn partition(chunk: Vec<LogEvent>) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut batch_index: Vec<(EventKind, usize)> = Vec::new();

    for entry in chunk {
        if entry.batchable
            && let Some((_, idx)) = batch_index.iter().find(|(k, _)| *k == entry.kind)
        {
            let group = &mut groups[*idx];
            group.notification.items.extend(entry.payloads().cloned());
            group.notification.batch_count += entry.batch_count;
            if entry.enqueued_at < group.notification.enqueued_at {
                group.notification.enqueued_at = entry.enqueued_at;
            }
            group.sources.push(entry);
            continue;
        }

        if entry.batchable {
            batch_index.push((entry.kind.clone(), groups.len()));
        }
        groups.push(Group {
            notification: Notification {
                kind: entry.kind.clone(),
                batch_count: entry.batch_count,
                items: entry.payloads().cloned().collect(),
                enqueued_at: entry.enqueued_at,
            },
            sources: vec![entry],
        });
    }
    groups
}

/// Renders and sends one chunk.
///
/// Stops at the first rate limit (everything not yet delivered is returned
/// for requeueing) or invalidity (nothing is requeued). Other errors drop the
/// failing notification and carry on with the rest.
pub async fn drain_chunk<R, T>(
    renderer: &R,
    transport: &T,
    target: &DeliveryTarget,
    chunk: Vec<LogEvent>,
) -> DrainReport
where
    R: Renderer,
    T: Transport,
{
    let mut report = DrainReport {
        delivered: 0,
        dropped: 0,
        requeue: Vec::new(),
        outcome: DrainOutcome::Completed,
    };
    let mut groups = partition(chunk).into_iter();

    'groups: while let Some(group) = groups.next() {
        let kind = &group.notification.kind;
        let messages = renderer.render(&group.notification, target.localizer.as_ref());
        if messages.is_empty() {
            warn!(
                destination = %target.key,
                kind = %kind,
                "Renderer produced no messages, dropping"
            );
            report.dropped += 1;
            continue;
        }

        for message in &messages {
            let Err(err) = transport.send(&target.credentials, message).await else {
                continue;
            };
            match err.kind {
                DeliveryErrorKind::RateLimited { retry_after } => {
                    report.requeue = group.sources;
                    report.requeue.extend(groups.by_ref().flat_map(|g| g.sources));
                    report.outcome = DrainOutcome::RateLimited { retry_after };
                    return report;
                }
                DeliveryErrorKind::Invalid => {
                    error!(
                        destination = %target.key,
                        kind = %kind,
                        error = %err,
                        "Destination rejected delivery as invalid"
                    );
                    report.outcome = DrainOutcome::Invalidated;
                    return report;
                }
                DeliveryErrorKind::Other => {
                    warn!(
                        destination = %target.key,
                        kind = %kind,
                        error = %err,
                        "Delivery failed, dropping notification"
                    );
                    report.dropped += 1;
                    continue 'groups;
                }
            }
        }

        debug!(
            destination = %target.key,
            kind = %kind,
            count = group.notification.batch_count,
            messages = messages.len(),
            "Delivered notification"
        );
        report.delivered += 1;
    }
    report
}
