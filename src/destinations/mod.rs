//! Destination resolution.
//!
//! The engine never stores guild configuration itself. When the first event
//! for a `(guild, category)` arrives it asks a [`DestinationResolver`] where
//! that category is logged, and caches the answer until the destination turns
//! out to be permanently invalid.

pub mod static_config;

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::delivery::{Credentials, Localizer};
use crate::types::{DestinationId, GuildId, LogCategory};

pub use static_config::{ConfigError, StaticResolver};

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The configuration backend could not be reached or read.
    #[error("destination lookup failed: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, ResolveError>;

/// A resolved delivery target.
#[derive(Clone)]
pub struct ResolvedDestination {
    pub id: DestinationId,
    pub credentials: Credentials,
    /// String lookup for the guild's configured language.
    pub localizer: Arc<dyn Localizer>,
}

impl std::fmt::Debug for ResolvedDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedDestination")
            .field("id", &self.id)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

pub trait DestinationResolver: Send + Sync + 'static {
    /// Where `category` is logged for `guild`, or `None` if logging is
    /// disabled for it.
    fn resolve(
        &self,
        guild: GuildId,
        category: LogCategory,
    ) -> impl Future<Output = Result<Option<ResolvedDestination>>> + Send;

    /// Called once a destination has been torn down as permanently invalid,
    /// so the backing configuration can forget it.
    fn invalidate(
        &self,
        guild: GuildId,
        category: LogCategory,
        destination: &DestinationId,
    ) -> impl Future<Output = ()> + Send {
        let _ = (guild, category, destination);
        async {}
    }
}
