pub mod dashboard;
pub mod health;
pub mod track;

use axum::Router;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::realtime::stream;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(track::router())
        .merge(dashboard::router())
        .merge(stream::router())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        track::track_event,
        dashboard::dashboard_stats,
        stream::subscribe,
        stream::connection_stats,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            // Models
            crate::models::event::OrgStats,
            // Realtime envelopes
            crate::realtime::BroadcastMessage,
            crate::realtime::MessageType,
            crate::realtime::EventProjection,
            crate::realtime::RegistryStats,
            // Route request/response types
            health::HealthResponse,
            track::TrackEventRequest,
            track::TrackEventResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Tracking", description = "Event ingestion"),
        (name = "Dashboard", description = "Organization counters"),
        (name = "Realtime", description = "Live event stream"),
    )
)]
pub struct ApiDoc;
