//! Live event distribution: subscriber registry, fan-out, keep-alive and
//! stale sweeps, and the SSE endpoint subscribers connect to.

pub mod bridge;
pub mod channel;
pub mod lifecycle;
pub mod message;
pub mod registry;
pub mod scheduler;
pub mod stream;

pub use bridge::{EventProjection, IngestionBridge};
pub use channel::{SseChannel, SubscriptionChannel};
pub use lifecycle::{LifecycleState, Realtime};
pub use message::{BroadcastMessage, Frame, MessageType};
pub use registry::{ConnectionRegistry, DeliveryReport, RegistryStats};
pub use scheduler::{LifecycleScheduler, SchedulerConfig};

/// Errors surfaced to callers of the registry.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("organization id must not be empty")]
    InvalidOrgId,
    #[error("realtime events are shutting down")]
    ShuttingDown,
    #[error("invalid scheduler configuration: {0}")]
    InvalidSchedule(&'static str),
}

/// Failure pushing a frame to one subscriber.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("subscriber transport is closed")]
    Closed,
    #[error("subscriber buffer is full")]
    Backpressure,
    #[error("no such connection")]
    UnknownConnection,
    #[error("failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),
}
