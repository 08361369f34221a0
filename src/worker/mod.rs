//! Per-destination workers and the dispatcher that feeds them.
//!
//! Each destination gets a dedicated worker task that owns its queue state,
//! runs the batching timer and drives delivery. Destinations drain
//! concurrently; within one destination there is never more than one drain in
//! flight.
//!
//! # Module Structure
//!
//! - [`config`]: engine limits and timing windows
//! - [`dispatch`]: ingress, ban suppression, routing and worker lifecycle
//! - [`message`]: messages sent to a worker
//! - [`worker`]: the per-destination event loop

pub mod config;
pub mod dispatch;
pub mod message;
#[allow(clippy::module_inception)]
pub mod worker;

#[cfg(test)]
mod tests;

pub use config::EngineConfig;
pub use dispatch::{DispatchError, Dispatcher, IngressOutcome};
pub use message::WorkerMessage;
pub use worker::{DestinationWorker, WorkerExit};
