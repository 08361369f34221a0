//! Event ingress and flush endpoints.
//!
//! Upstream observers post one normalized event per request. The handler only
//! routes it; batching, merging and delivery happen in the destination
//! workers, so a 202 means "accepted for delivery", not "delivered".

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::AppState;
use crate::delivery::{Renderer, Transport};
use crate::destinations::DestinationResolver;
use crate::queue::DedupKey;
use crate::types::{EventKind, EventPayload, GuildId, LogCategory, UnknownCategory};
use crate::worker::{DispatchError, IngressOutcome};

/// Body of `POST /events`.
///
/// `category` may be omitted, in which case the kind's default category is
/// used.
#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub guild_id: GuildId,
    #[serde(default)]
    pub category: Option<LogCategory>,
    pub kind: EventKind,
    #[serde(default)]
    pub payload: EventPayload,
    #[serde(default)]
    pub dedup_key: Option<DedupKey>,
}

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error(transparent)]
    UnknownCategory(#[from] UnknownCategory),

    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngressError::InvalidJson(_) | IngressError::UnknownCategory(_) => {
                StatusCode::BAD_REQUEST
            }
            IngressError::Dispatch(DispatchError::Resolve(_)) => StatusCode::BAD_GATEWAY,
            IngressError::Dispatch(DispatchError::ChannelClosed) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// `POST /events`
///
/// - 202 Accepted: handed to the destination worker
/// - 200 OK: dropped on purpose (duplicate ban, or logging disabled)
/// - 400 Bad Request: malformed body
/// - 502/503: destination lookup or worker failure
pub async fn events_handler<D, R, T>(
    State(state): State<AppState<D, R, T>>,
    body: Bytes,
) -> Result<Response, IngressError>
where
    D: DestinationResolver,
    R: Renderer,
    T: Transport,
{
    let request: EventRequest = serde_json::from_slice(&body).inspect_err(|e| {
        warn!(error = %e, "Rejected malformed event");
    })?;
    let category = request
        .category
        .unwrap_or_else(|| request.kind.default_category());

    debug!(
        guild = %request.guild_id,
        category = %category,
        kind = %request.kind,
        "Received event"
    );

    let outcome = state
        .dispatcher()
        .log_event(
            request.guild_id,
            category,
            request.kind,
            request.payload,
            request.dedup_key,
        )
        .await
        .inspect_err(|e| error!(error = %e, "Dispatch failed"))?;

    let response = match outcome {
        IngressOutcome::Routed(key) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "accepted", "destination": key.to_string() })),
        ),
        IngressOutcome::Suppressed => (
            StatusCode::OK,
            Json(json!({ "status": "suppressed", "reason": "duplicate ban" })),
        ),
        IngressOutcome::Disabled => (
            StatusCode::OK,
            Json(json!({ "status": "disabled", "reason": "no destination for category" })),
        ),
    };
    Ok(response.into_response())
}

/// `POST /guilds/{guild_id}/flush/{category}`
///
/// 202 if a worker was asked to drain, 200 if nothing is running for that
/// category.
pub async fn flush_handler<D, R, T>(
    State(state): State<AppState<D, R, T>>,
    Path((guild_id, category)): Path<(u64, String)>,
) -> Result<(StatusCode, &'static str), IngressError>
where
    D: DestinationResolver,
    R: Renderer,
    T: Transport,
{
    let category: LogCategory = category.parse()?;
    if state.dispatcher().flush(GuildId(guild_id), category).await? {
        Ok((StatusCode::ACCEPTED, "Flush requested"))
    } else {
        Ok((StatusCode::OK, "Nothing to flush"))
    }
}
