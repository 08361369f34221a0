//! The delivery transport contract and its error taxonomy.
//!
//! A transport sends one rendered message to one destination. Every failure is
//! classified into exactly one of three kinds, and the drain loop treats them
//! very differently:
//!
//! - **RateLimited**: the sink asked us to wait. The notification is requeued
//!   and the destination backs off.
//! - **Invalid**: the destination no longer exists (or we lost access). The
//!   destination is torn down and never retried.
//! - **Other**: anything else. Logged and the notification is dropped.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use super::render::RenderedMessage;

/// Where and how to deliver.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub url: String,
}

impl Credentials {
    pub fn new(url: impl Into<String>) -> Self {
        Credentials { url: url.into() }
    }
}

// Webhook URLs embed their token; keep them out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// The sink asked us to retry after this long.
    RateLimited { retry_after: Duration },
    /// The destination is gone; do not retry.
    Invalid,
    Other,
}

/// A failed send, classified for the drain loop.
#[derive(Debug, Error)]
pub struct DeliveryError {
    pub kind: DeliveryErrorKind,

    /// The HTTP status code, if there was a response.
    pub status_code: Option<u16>,

    pub message: String,

    #[source]
    pub source: Option<reqwest::Error>,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "delivery failed (HTTP {}): {}", code, self.message),
            None => write!(f, "delivery failed: {}", self.message),
        }
    }
}

impl DeliveryError {
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self {
            kind: DeliveryErrorKind::RateLimited { retry_after },
            status_code: Some(429),
            message: format!("rate limited, retry after {}ms", retry_after.as_millis()),
            source: None,
        }
    }

    pub fn invalid(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: DeliveryErrorKind::Invalid,
            status_code,
            message: message.into(),
            source: None,
        }
    }

    pub fn other(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: DeliveryErrorKind::Other,
            status_code,
            message: message.into(),
            source: None,
        }
    }

    /// Classifies a transport-level failure (no usable response).
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        Self {
            kind: DeliveryErrorKind::Other,
            status_code: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
            source: Some(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Sends a rendered message to a destination.
///
/// Each call is independent; the caller guarantees at most one in-flight call
/// per destination.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        credentials: &Credentials,
        message: &RenderedMessage,
    ) -> impl Future<Output = Result<()>> + Send;
}
