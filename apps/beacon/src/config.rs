use std::time::Duration;

use beacon_core::TopicScheme;
use uuid::Uuid;

use crate::queue::DEFAULT_QUEUE_CAPACITY;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Connection details for the MQTT broker. TLS and credentials are not
/// optional: every connection attempt authenticates over TLS, and a rejected
/// attempt is fatal to the owning process.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub keep_alive: Duration,
}

impl BrokerConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            client_id: format!("beacon-{}", Uuid::new_v4().simple()),
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

/// What `enqueue` does when the outbound queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait for the send worker to free a slot.
    Block,
    /// Fail fast with [`crate::queue::QueueError::Full`].
    Reject,
}

/// Per-instance knobs for a [`crate::Communicator`].
#[derive(Debug, Clone)]
pub struct CommunicatorOptions {
    /// Stop the instance once its one-shot duty is discharged: outbound queue
    /// drained and the rendezvous value sent (producer) or received
    /// (consumer). When false the instance runs until the process exits,
    /// e.g. a producer left up to answer several consumers.
    pub self_terminate: bool,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    /// How often the send worker re-evaluates its stop condition while idle.
    pub poll_interval: Duration,
    pub topics: TopicScheme,
}

impl CommunicatorOptions {
    pub fn with_self_terminate(mut self, self_terminate: bool) -> Self {
        self.self_terminate = self_terminate;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_topics(mut self, topics: TopicScheme) -> Self {
        self.topics = topics;
        self
    }
}

impl Default for CommunicatorOptions {
    fn default() -> Self {
        Self {
            self_terminate: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::Block,
            poll_interval: DEFAULT_POLL_INTERVAL,
            topics: TopicScheme::default(),
        }
    }
}
