//! Wire envelope for messages pushed to live subscribers.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Discriminator carried in the `type` field of every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Sent once right after a subscriber is registered.
    Connected,
    /// A tracked event was stored for the subscriber's organization.
    NewEvent,
    /// Aggregate counters for the organization.
    StatsUpdate,
    /// Periodic keep-alive.
    Ping,
    /// The process is going away; the subscriber should reconnect later.
    Shutdown,
}

/// `{ "type", "timestamp", "payload"? }` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// RFC 3339 UTC timestamp with millisecond precision.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl BroadcastMessage {
    pub fn new(kind: MessageType, payload: Option<Value>) -> Self {
        Self::at(kind, Utc::now(), payload)
    }

    pub fn at(kind: MessageType, at: DateTime<Utc>, payload: Option<Value>) -> Self {
        Self {
            kind,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            payload,
        }
    }

    pub fn connected(connection_id: &str, org_id: &str) -> Self {
        Self::new(
            MessageType::Connected,
            Some(serde_json::json!({
                "connectionId": connection_id,
                "orgId": org_id,
            })),
        )
    }

    pub fn new_event(payload: Value) -> Self {
        Self::new(MessageType::NewEvent, Some(payload))
    }

    pub fn stats_update(payload: Value) -> Self {
        Self::new(MessageType::StatsUpdate, Some(payload))
    }

    pub fn ping() -> Self {
        Self::new(MessageType::Ping, None)
    }

    pub fn shutdown() -> Self {
        Self::new(MessageType::Shutdown, None)
    }

    /// Serialize the envelope into a frame that can be handed to any number
    /// of subscribers without re-encoding.
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(Frame(Arc::from(json)))
    }
}

/// A serialized envelope. Cloning shares the underlying buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Arc<str>);

impl Frame {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when both frames point at the same allocation.
    pub fn shares_buffer(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
