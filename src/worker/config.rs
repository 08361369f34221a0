//! Engine configuration.
//!
//! Limits are configurable via environment variables; the timing windows are
//! fixed by the merge and scheduling rules and only overridden in tests.
//!
//! | Variable                        | Default |
//! |---------------------------------|---------|
//! | `MODLOG_MAX_PENDING`            | 200     |
//! | `MODLOG_CHUNK_SIZE`             | 10      |
//! | `MODLOG_MAX_BACKOFF_SECS`       | 60      |
//! | `MODLOG_WORKER_CHANNEL_BUFFER`  | 256     |

use std::str::FromStr;
use std::time::Duration;

use crate::delivery::{BackoffConfig, DEFAULT_MAX_BACKOFF};
use crate::merge::{DEFAULT_CORRELATION_WINDOW, DEFAULT_DEBOUNCE, MergeWindows};
use crate::queue::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_PENDING, QueueConfig};
use crate::suppression::DEFAULT_BAN_TTL;

/// Default channel buffer between ingress and a destination worker.
const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Default interval between ban-cache sweeps.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Cap on each destination's pending list.
    pub max_pending: usize,

    /// Entries popped per drain.
    pub chunk_size: usize,

    /// Cap on a single backoff delay.
    pub max_backoff: Duration,

    /// Buffer of each worker's message channel.
    pub channel_buffer: usize,

    /// Same-kind / same-key debounce interval.
    pub debounce: Duration,

    /// Leave/ban correlation window.
    pub correlation_window: Duration,

    /// Lifetime of a duplicate-ban suppression entry.
    pub ban_ttl: Duration,

    /// How often expired ban-cache entries are swept.
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    pub fn new() -> Self {
        EngineConfig {
            max_pending: DEFAULT_MAX_PENDING,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_backoff: DEFAULT_MAX_BACKOFF,
            channel_buffer: DEFAULT_CHANNEL_BUFFER,
            debounce: DEFAULT_DEBOUNCE,
            correlation_window: DEFAULT_CORRELATION_WINDOW,
            ban_ttl: DEFAULT_BAN_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Reads overrides from the environment. Unset or unparsable variables
    /// keep their defaults; zero sizes are raised to one.
    pub fn from_env() -> Self {
        let defaults = Self::new();
        EngineConfig {
            max_pending: env_or("MODLOG_MAX_PENDING", defaults.max_pending).max(1),
            chunk_size: env_or("MODLOG_CHUNK_SIZE", defaults.chunk_size).max(1),
            max_backoff: Duration::from_secs(env_or(
                "MODLOG_MAX_BACKOFF_SECS",
                defaults.max_backoff.as_secs(),
            )),
            channel_buffer: env_or("MODLOG_WORKER_CHANNEL_BUFFER", defaults.channel_buffer)
                .max(1),
            ..defaults
        }
    }

    /// Per-destination queue settings derived from this config.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_pending: self.max_pending,
            chunk_size: self.chunk_size,
            windows: MergeWindows {
                debounce: self.debounce,
                correlation: self.correlation_window,
            },
            backoff: BackoffConfig::with_max_delay(self.max_backoff),
        }
    }
}
