//! Hand-off from "event stored" to "event pushed to live subscribers".

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use utoipa::ToSchema;

use crate::models::event::Event;

use super::message::BroadcastMessage;
use super::registry::{ConnectionRegistry, DeliveryReport};

/// Broadcast-ready view of a stored event.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventProjection {
    pub id: String,
    pub event_name: String,
    pub page_url: Option<String>,
    pub page_title: Option<String>,
    pub device: String,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub visitors_id: Option<String>,
    pub session_id: Option<String>,
    pub received_at: DateTime<Utc>,
    pub client_timestamp: Option<DateTime<Utc>>,
}

impl From<&Event> for EventProjection {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.clone(),
            event_name: event.event_name.clone(),
            page_url: event.page_url.clone(),
            page_title: event.page_title.clone(),
            device: event.device.clone(),
            browser: event.browser.clone(),
            os: event.os.clone(),
            visitors_id: event.visitors_id.clone(),
            session_id: event.session_id.clone(),
            received_at: event.received_at,
            client_timestamp: event.client_timestamp,
        }
    }
}

/// Submits `new_event` broadcasts to a background task.
#[derive(Clone)]
pub struct IngestionBridge {
    registry: Arc<ConnectionRegistry>,
}

impl IngestionBridge {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Broadcast a freshly stored event to its organization's subscribers.
    ///
    /// Returns immediately; the handle may be dropped.
    pub fn publish_event(&self, org_id: &str, event: EventProjection) -> JoinHandle<DeliveryReport> {
        let registry = self.registry.clone();
        let org_id = org_id.to_string();

        tokio::spawn(async move {
            let payload = match serde_json::to_value(&event) {
                Ok(v) => v,
                Err(err) => {
                    tracing::error!(?err, event_id = %event.id, "failed to encode event projection");
                    return DeliveryReport::default();
                }
            };
            registry.broadcast(&org_id, &BroadcastMessage::new_event(payload))
        })
    }
}
