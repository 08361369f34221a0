//! HTTP ingress for the relay sidecar.
//!
//! # Endpoints
//!
//! - `POST /events` - submits one log event (202 when routed)
//! - `POST /guilds/{guild_id}/flush/{category}` - drains a category now
//! - `GET /health` - returns 200 if the server is running

use axum::Router;
use axum::routing::{get, post};

use crate::delivery::{Renderer, Transport};
use crate::destinations::DestinationResolver;
use crate::worker::Dispatcher;

pub mod events;
pub mod health;

pub use events::{EventRequest, IngressError, events_handler, flush_handler};
pub use health::health_handler;

/// Shared application state, handed to handlers via axum's `State`
/// extractor.
pub struct AppState<D, R, T> {
    dispatcher: Dispatcher<D, R, T>,
}

impl<D, R, T> Clone for AppState<D, R, T> {
    fn clone(&self) -> Self {
        AppState {
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<D, R, T> AppState<D, R, T> {
    pub fn new(dispatcher: Dispatcher<D, R, T>) -> Self {
        AppState { dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher<D, R, T> {
        &self.dispatcher
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<D, R, T>(app_state: AppState<D, R, T>) -> Router
where
    D: DestinationResolver,
    R: Renderer,
    T: Transport,
{
    Router::new()
        .route("/events", post(events_handler::<D, R, T>))
        .route(
            "/guilds/{guild_id}/flush/{category}",
            post(flush_handler::<D, R, T>),
        )
        .route("/health", get(health_handler))
        .with_state(app_state)
}
