use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod memory;
pub mod mqtt;

pub use memory::{MemoryBroker, MemorySession};
pub use mqtt::MqttSession;

/// Depth of the session event channel and of the client's request queue.
pub const EVENT_CHANNEL_DEPTH: usize = 64;

/// Notifications a session posts to its owner. Delivered over a bounded
/// channel so broker callbacks never mutate shared state re-entrantly; the
/// dispatch worker is the single consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Message { topic: String, payload: Bytes },
    /// Terminal failure of the broker connection. No further events follow.
    Failed(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("broker connection failed: {0}")]
    Connect(String),
    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("broker session closed")]
    Closed,
}

pub type SessionResult<T> = Result<T, SessionError>;

/// A live connection to the publish/subscribe broker. Connecting happens in
/// the concrete constructors, which also hand out the event stream; after
/// that the session is only driven through these methods.
///
/// Every subscribe and publish uses at-least-once delivery, and every publish
/// may carry the retain flag so a late subscriber still gets the last value.
#[async_trait]
pub trait Session: Send + Sync {
    async fn subscribe(&self, topic: &str) -> SessionResult<()>;
    async fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> SessionResult<()>;
    async fn disconnect(&self) -> SessionResult<()>;
}
