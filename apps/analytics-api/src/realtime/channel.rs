//! Per-connection send capability.

use tokio::sync::mpsc;

use super::message::Frame;
use super::SendError;

/// A sink that pushes one serialized frame to a single subscriber transport.
///
/// `send` must not block: the registry calls it while fanning out to every
/// connection of an organization.
pub trait SubscriptionChannel: Send + Sync {
    fn send(&self, frame: &Frame) -> Result<(), SendError>;
}

/// Channel backed by a bounded queue drained by an SSE response body.
pub struct SseChannel {
    tx: mpsc::Sender<Frame>,
}

impl SseChannel {
    /// Create a channel and the receiver the streaming response reads from.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

impl SubscriptionChannel for SseChannel {
    fn send(&self, frame: &Frame) -> Result<(), SendError> {
        self.tx.try_send(frame.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }
}
