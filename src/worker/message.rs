//! Messages sent from ingress to a destination worker.

use crate::queue::LogEvent;

/// Messages a destination worker receives over its channel.
///
/// Workers process these serially; the worker is the only writer of its
/// destination's queue state.
#[derive(Debug)]
pub enum WorkerMessage {
    /// A new event to admit. Ban suppression has already been applied.
    Event(LogEvent),

    /// Drain as soon as the cooldown allows, without waiting for the batch
    /// window.
    Flush,

    /// Stop the event loop after one final best-effort drain.
    Shutdown,
}
