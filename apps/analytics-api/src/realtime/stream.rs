//! SSE endpoint subscribers connect to, plus registry observability.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use futures_util::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use utoipa::IntoParams;

use crate::auth::middleware::AuthUser;
use crate::error::ApiError;
use crate::AppState;

use super::channel::SseChannel;
use super::message::{BroadcastMessage, Frame};
use super::registry::{ConnectionId, ConnectionRegistry, RegistryStats};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/realtime/events", get(subscribe))
        .route("/api/realtime/stats", get(connection_stats))
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeParams {
    /// Organization to receive live events for.
    pub org_id: Option<String>,
}

/// Response body of a live subscription. Dropping it, which axum does when
/// the client goes away, unregisters the connection.
pub struct SubscriberStream {
    rx: mpsc::Receiver<Frame>,
    registry: Arc<ConnectionRegistry>,
    org_id: String,
    connection_id: ConnectionId,
}

impl Stream for SubscriberStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
            .map(|frame| frame.map(|f| Ok(Event::default().data(f.as_str()))))
    }
}

impl Drop for SubscriberStream {
    fn drop(&mut self) {
        tracing::debug!(conn_id = %self.connection_id, org_id = %self.org_id, "subscriber stream closed");
        self.registry
            .remove_connection(&self.org_id, &self.connection_id);
    }
}

// ---------------------------------------------------------------------------
// GET /api/realtime/events?orgId=
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/realtime/events",
    tag = "Realtime",
    security(("bearer" = [])),
    params(SubscribeParams),
    responses(
        (status = 200, description = "Server-sent event stream of BroadcastMessage envelopes", content_type = "text/event-stream"),
        (status = 400, description = "Missing orgId", body = crate::error::ApiErrorBody),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorBody),
        (status = 403, description = "Not a member of the organization", body = crate::error::ApiErrorBody),
        (status = 503, description = "Shutting down", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn subscribe(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<SubscribeParams>,
) -> Result<Sse<SubscriberStream>, ApiError> {
    let org_id = params
        .org_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("orgId parameter is required"))?;

    let realtime = &state.realtime;
    if !realtime.is_accepting() {
        return Err(ApiError::unavailable("Realtime events are shutting down"));
    }
    realtime.init();

    if !state.store.is_member(&user_id, &org_id).await? {
        return Err(ApiError::forbidden(
            "You do not have access to this organization",
        ));
    }

    let registry = realtime.registry().clone();
    let (channel, rx) = SseChannel::new(state.config.channel_buffer);
    let connection_id = registry.add_connection(&org_id, Box::new(channel))?;
    tracing::info!(%user_id, %org_id, conn_id = %connection_id, "realtime subscriber connected");

    // From here on the connection is owned by the stream and removed on drop.
    let stream = SubscriberStream {
        rx,
        registry: registry.clone(),
        org_id: org_id.clone(),
        connection_id: connection_id.clone(),
    };

    let connected = BroadcastMessage::connected(&connection_id, &org_id);
    if let Err(err) = registry.send_to(&org_id, &connection_id, &connected) {
        tracing::warn!(conn_id = %connection_id, %err, "failed to send connected message");
    }

    match state.store.org_stats(&org_id, Utc::now()).await {
        Ok(stats) => {
            let update = serde_json::to_value(stats).map(BroadcastMessage::stats_update);
            if let Ok(update) = update {
                if let Err(err) = registry.send_to(&org_id, &connection_id, &update) {
                    tracing::warn!(conn_id = %connection_id, %err, "failed to send initial stats");
                }
            }
        }
        Err(err) => {
            tracing::warn!(%org_id, ?err, "initial stats unavailable");
        }
    }

    Ok(Sse::new(stream))
}

// ---------------------------------------------------------------------------
// GET /api/realtime/stats
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/realtime/stats",
    tag = "Realtime",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Live connection counts over the caller's organizations", body = RegistryStats),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn connection_stats(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<RegistryStats>, ApiError> {
    let member_of: HashSet<String> = state
        .store
        .member_org_ids(&user_id)
        .await?
        .into_iter()
        .collect();

    let stats = state.realtime.registry().get_connection_stats();
    Ok(Json(visible_stats(stats, &member_of)))
}

/// Restrict a registry snapshot to `org_ids`, totals included.
fn visible_stats(stats: RegistryStats, org_ids: &HashSet<String>) -> RegistryStats {
    let connections_by_org: HashMap<String, usize> = stats
        .connections_by_org
        .into_iter()
        .filter(|(org_id, _)| org_ids.contains(org_id))
        .collect();

    RegistryStats {
        total_orgs: connections_by_org.len(),
        total_connections: connections_by_org.values().sum(),
        connections_by_org,
    }
}
