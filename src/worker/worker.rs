//! Per-destination event loop.
//!
//! Each destination gets a dedicated worker task that owns its
//! [`QueueState`] outright. Nothing else ever touches that state, so
//! admission, scheduling and drain bookkeeping need no locks.
//!
//! # Event Loop
//!
//! The loop waits on four things at once:
//! - the shutdown token
//! - the message channel (new events, flush requests, shutdown)
//! - the in-flight drain, if any
//! - the flush deadline, if any
//!
//! A drain runs as its own task so the loop keeps admitting events while
//! render/transport calls are pending. There is never more than one: the
//! flush deadline is suppressed while a drain is in flight, and a new drain is
//! only started from the deadline branch.
//!
//! # Shutdown
//!
//! On shutdown the worker admits events already sitting in its channel, waits
//! for an in-flight drain, then makes one final
//! best-effort pass over everything still pending (correlation holds are
//! ignored), stopping at the first rate limit or invalidity.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::delivery::{DeliveryTarget, DrainOutcome, DrainReport, Renderer, Transport, drain_chunk};
use crate::queue::{DrainVerdict, QueueConfig, QueueState, TimerAction};

use super::message::WorkerMessage;

/// Why a worker's event loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Shutdown was requested.
    Shutdown,
    /// Every sender was dropped.
    ChannelClosed,
    /// The destination was torn down as permanently invalid.
    Invalidated,
}

pub struct DestinationWorker<R, T> {
    state: QueueState,
    target: DeliveryTarget,
    renderer: Arc<R>,
    transport: Arc<T>,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn join_drain(
    in_flight: &mut Option<JoinHandle<DrainReport>>,
) -> Result<DrainReport, JoinError> {
    match in_flight {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Stands in for a drain task that panicked: its chunk is lost.
fn lost_chunk(err: &JoinError) -> DrainReport {
    error!(error = %err, "Drain task failed, chunk lost");
    DrainReport {
        delivered: 0,
        dropped: 0,
        requeue: Vec::new(),
        outcome: DrainOutcome::Completed,
    }
}

impl<R: Renderer, T: Transport> DestinationWorker<R, T> {
    pub fn new(
        target: DeliveryTarget,
        config: QueueConfig,
        renderer: Arc<R>,
        transport: Arc<T>,
    ) -> Self {
        DestinationWorker {
            state: QueueState::new(target.key.clone(), config),
            target,
            renderer,
            transport,
        }
    }

    /// Runs the worker event loop until shutdown, channel close or
    /// invalidation.
    #[instrument(skip_all, fields(destination = %self.target.key))]
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<WorkerMessage>,
        shutdown: CancellationToken,
    ) -> WorkerExit {
        info!("Destination worker started");
        let mut in_flight: Option<JoinHandle<DrainReport>> = None;

        let exit = loop {
            let deadline = self.state.flush_deadline();

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping worker");
                    break WorkerExit::Shutdown;
                }

                msg = rx.recv() => {
                    match msg {
                        Some(WorkerMessage::Event(event)) => {
                            self.state.admit(event, Instant::now());
                        }
                        Some(WorkerMessage::Flush) => {
                            debug!("Flush requested");
                            self.state.request_flush(Instant::now());
                        }
                        Some(WorkerMessage::Shutdown) => {
                            info!("Shutdown message received");
                            break WorkerExit::Shutdown;
                        }
                        None => {
                            info!("Message channel closed");
                            break WorkerExit::ChannelClosed;
                        }
                    }
                }

                joined = join_drain(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    let report = joined.unwrap_or_else(|e| lost_chunk(&e));
                    if self.state.finish_drain(report, Instant::now()) == DrainVerdict::TornDown {
                        break WorkerExit::Invalidated;
                    }
                }

                _ = sleep_until(deadline), if deadline.is_some() => {
                    let now = Instant::now();
                    if self.state.on_timer(now) == TimerAction::Drain {
                        in_flight = self.spawn_drain(now);
                    }
                }
            }
        };

        let exit = if exit == WorkerExit::Invalidated {
            exit
        } else {
            // Admit whatever was already sent before giving up the channel.
            rx.close();
            while let Ok(msg) = rx.try_recv() {
                if let WorkerMessage::Event(event) = msg {
                    self.state.admit(event, Instant::now());
                }
            }
            match self.final_drain(in_flight).await {
                DrainVerdict::TornDown => WorkerExit::Invalidated,
                DrainVerdict::Continue => exit,
            }
        };
        info!(?exit, "Destination worker stopped");
        exit
    }

    fn spawn_drain(&mut self, now: Instant) -> Option<JoinHandle<DrainReport>> {
        let chunk = self.state.begin_drain(now);
        if chunk.is_empty() {
            return None;
        }
        let renderer = Arc::clone(&self.renderer);
        let transport = Arc::clone(&self.transport);
        let target = self.target.clone();
        Some(tokio::spawn(async move {
            drain_chunk(renderer.as_ref(), transport.as_ref(), &target, chunk).await
        }))
    }

    /// Delivers whatever is left, best effort. Reports `TornDown` if the
    /// destination turned out to be invalid along the way.
    async fn final_drain(
        &mut self,
        in_flight: Option<JoinHandle<DrainReport>>,
    ) -> DrainVerdict {
        if let Some(handle) = in_flight {
            let report = handle.await.unwrap_or_else(|e| lost_chunk(&e));
            let outcome = report.outcome;
            let verdict = self.state.finish_drain(report, Instant::now());
            if outcome != DrainOutcome::Completed {
                return verdict;
            }
        }

        self.state.release_holds();
        let mut verdict = DrainVerdict::Continue;
        loop {
            let chunk = self.state.begin_drain(Instant::now());
            if chunk.is_empty() {
                break;
            }
            debug!(entries = chunk.len(), "Final drain");
            let report = drain_chunk(
                self.renderer.as_ref(),
                self.transport.as_ref(),
                &self.target,
                chunk,
            )
            .await;
            let outcome = report.outcome;
            verdict = self.state.finish_drain(report, Instant::now());
            if outcome != DrainOutcome::Completed {
                break;
            }
        }
        if !self.state.pending().is_empty() {
            info!(
                left = self.state.pending().len(),
                "Pending entries dropped at shutdown"
            );
        }
        verdict
    }
}
