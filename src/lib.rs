//! Modlog Relay - batches moderation and audit log events per destination and
//! relays them to chat webhooks.
//!
//! Events are merged (deduplicated, coalesced, correlated across kinds),
//! ordered by priority and delivered in chunks by one worker per destination,
//! with exponential backoff on rate limits and teardown of destinations that
//! turn out to be permanently invalid.

pub mod delivery;
pub mod destinations;
pub mod merge;
pub mod queue;
pub mod server;
pub mod suppression;
pub mod types;
pub mod worker;

#[cfg(test)]
mod test_utils;
