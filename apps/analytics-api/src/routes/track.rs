//! Event ingestion from tracking snippets.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use nexora_common::id::{prefix, prefixed_ulid};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::auth::api_key::{hash_api_key, is_valid_api_key_format};
use crate::error::{ApiError, FieldError};
use crate::models::event::Event;
use crate::realtime::EventProjection;
use crate::user_agent;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/track", post(track_event))
}

const DEVICES: &[&str] = &["desktop", "mobile", "tablet"];
const MAX_EVENT_NAME_LEN: usize = 100;
const MAX_PAGE_TITLE_LEN: usize = 500;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackEventRequest {
    /// `nx_` followed by 64 lowercase hex characters.
    pub api_key: String,
    pub event_name: String,
    pub event_data: Option<Value>,
    pub visitors_id: Option<String>,
    pub session_id: Option<String>,
    pub page_url: Option<String>,
    pub page_title: Option<String>,
    pub referrer: Option<String>,
    /// One of `desktop`, `mobile`, `tablet`. Defaults to `desktop`.
    pub device: Option<String>,
    pub user_agent: Option<String>,
    /// RFC 3339 time the event happened on the client.
    pub client_timestamp: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackEventResponse {
    pub success: bool,
    pub event_id: String,
}

// ---------------------------------------------------------------------------
// POST /api/track
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/track",
    tag = "Tracking",
    request_body = TrackEventRequest,
    responses(
        (status = 200, description = "Event stored", body = TrackEventResponse),
        (status = 400, description = "Validation error", body = crate::error::ApiErrorBody),
        (status = 401, description = "Unknown or inactive API key", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn track_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TrackEventRequest>,
) -> Result<Json<TrackEventResponse>, ApiError> {
    let now = Utc::now();
    let errors = validate(&body);
    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    let key = state
        .store
        .find_active_api_key(&hash_api_key(&body.api_key))
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or inactive API key"))?;

    let user_agent = body.user_agent.or_else(|| header_str(&headers, "user-agent"));
    let agent = user_agent
        .as_deref()
        .map(user_agent::parse)
        .unwrap_or_default();

    let event = Event {
        id: prefixed_ulid(prefix::EVENT),
        org_id: key.org_id.clone(),
        event_name: body.event_name.trim().to_string(),
        event_data: body.event_data,
        visitors_id: body.visitors_id,
        session_id: body.session_id,
        page_url: body.page_url,
        page_title: body.page_title,
        referrer: body.referrer,
        browser: agent.browser,
        os: agent.os,
        device: body.device.unwrap_or_else(|| "desktop".to_string()),
        user_agent,
        ip_address: client_ip(&headers),
        received_at: now,
        client_timestamp: body
            .client_timestamp
            .as_deref()
            .and_then(|ts| accepted_client_timestamp(ts, now)),
    };

    let event = state.store.insert_event(event).await?;
    tracing::info!(org_id = %event.org_id, event_id = %event.id, event_name = %event.event_name, "event tracked");

    state
        .realtime
        .bridge()
        .publish_event(&event.org_id, EventProjection::from(&event));

    let store = state.store.clone();
    let key_id = key.id;
    tokio::spawn(async move {
        if let Err(err) = store.touch_api_key(&key_id, now).await {
            tracing::warn!(%key_id, ?err, "failed to update api key last_used");
        }
    });

    Ok(Json(TrackEventResponse {
        success: true,
        event_id: event.id,
    }))
}

fn validate(body: &TrackEventRequest) -> Vec<FieldError> {
    let mut errors = Vec::new();
    let mut push = |field: &str, message: &str| {
        errors.push(FieldError {
            field: field.to_string(),
            message: message.to_string(),
        })
    };

    if !is_valid_api_key_format(&body.api_key) {
        push("apiKey", "Invalid API key format");
    }

    let name = body.event_name.trim();
    if name.is_empty() {
        push("eventName", "Event name is required");
    } else if name.chars().count() > MAX_EVENT_NAME_LEN {
        push("eventName", "Event name must be 100 characters or fewer");
    }

    if let Some(data) = &body.event_data {
        if !data.is_object() {
            push("eventData", "Event data must be an object");
        }
    }

    if let Some(url) = &body.page_url {
        if !is_absolute_url(url) {
            push("pageUrl", "Page URL must be an absolute http(s) URL");
        }
    }

    if let Some(title) = &body.page_title {
        if title.chars().count() > MAX_PAGE_TITLE_LEN {
            push("pageTitle", "Page title must be 500 characters or fewer");
        }
    }

    if let Some(device) = &body.device {
        if !DEVICES.contains(&device.as_str()) {
            push("device", "Device must be one of desktop, mobile, tablet");
        }
    }

    if let Some(ts) = &body.client_timestamp {
        if DateTime::parse_from_rfc3339(ts).is_err() {
            push("clientTimestamp", "Client timestamp must be an RFC 3339 date-time");
        }
    }

    errors
}

fn is_absolute_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            let host = rest.split(['/', '?', '#']).next().unwrap_or("");
            !host.is_empty() && !host.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Client clocks drift; anything outside `[now - 7d, now + 1m]` is dropped.
fn accepted_client_timestamp(ts: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc);
    if ts > now + Duration::minutes(1) || ts < now - Duration::days(7) {
        return None;
    }
    Some(ts)
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// First hop of `x-forwarded-for`, then `x-real-ip`, then `cf-connecting-ip`.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_str(headers, "x-real-ip"))
        .or_else(|| header_str(headers, "cf-connecting-ip"))
}
