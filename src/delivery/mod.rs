//! Delivery & Backoff Controller.
//!
//! - [`render`]: render contract, localizers and the default summary renderer
//! - [`transport`]: transport contract and delivery error taxonomy
//! - [`webhook`]: reqwest-backed HTTP webhook transport
//! - [`drain`]: partitioning and sending one popped chunk
//! - [`backoff`]: exponential delay after rate limits

pub mod backoff;
pub mod drain;
pub mod render;
pub mod transport;
pub mod webhook;

pub use backoff::{BackoffConfig, DEFAULT_MAX_BACKOFF};
pub use drain::{DeliveryTarget, DrainOutcome, DrainReport, Group, drain_chunk, partition};
pub use render::{
    Embed, EmbedField, Identity, Localizer, Notification, RenderedMessage, Renderer,
    SummaryRenderer, TableLocalizer,
};
pub use transport::{Credentials, DeliveryError, DeliveryErrorKind, Transport};
pub use webhook::WebhookTransport;
