use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Session, SessionError, SessionEvent, SessionResult, EVENT_CHANNEL_DEPTH};

/// In-process broker with retained-message semantics, for tests and
/// non-network contexts. Behaves like the real thing where it matters here:
/// the last payload published with the retain flag is replayed to any later
/// subscriber, and publishes are observable in order.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    inner: Mutex<BrokerInner>,
}

#[derive(Debug, Default)]
struct BrokerInner {
    peers: Vec<Peer>,
    retained: HashMap<String, Bytes>,
    publish_log: Vec<(String, Bytes)>,
    next_peer: u64,
}

#[derive(Debug)]
struct Peer {
    id: u64,
    topics: HashSet<String>,
    events: mpsc::Sender<SessionEvent>,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attaches a new session. Connection is immediate, so the `Connected`
    /// event is already waiting in the returned stream.
    pub fn open(self: &Arc<Self>) -> (MemorySession, mpsc::Receiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        let id = {
            let mut inner = self.inner.lock();
            inner.next_peer += 1;
            let id = inner.next_peer;
            inner.peers.push(Peer {
                id,
                topics: HashSet::new(),
                events: events_tx.clone(),
            });
            id
        };
        let _ = events_tx.try_send(SessionEvent::Connected);
        (
            MemorySession {
                broker: Arc::clone(self),
                id,
            },
            events_rx,
        )
    }

    /// Every publish the broker has seen, in arrival order.
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.inner.lock().publish_log.clone()
    }

    pub fn retained(&self, topic: &str) -> Option<Bytes> {
        self.inner.lock().retained.get(topic).cloned()
    }

    fn publish(&self, topic: &str, payload: Bytes, retain: bool) {
        let mut inner = self.inner.lock();
        inner.publish_log.push((topic.to_string(), payload.clone()));
        if retain {
            inner.retained.insert(topic.to_string(), payload.clone());
        }
        for peer in &inner.peers {
            if peer.topics.contains(topic) {
                let _ = peer.events.try_send(SessionEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                });
            }
        }
    }

    fn subscribe(&self, id: u64, topic: &str) {
        let mut inner = self.inner.lock();
        let retained = inner.retained.get(topic).cloned();
        if let Some(peer) = inner.peers.iter_mut().find(|peer| peer.id == id) {
            peer.topics.insert(topic.to_string());
            if let Some(payload) = retained {
                let _ = peer.events.try_send(SessionEvent::Message {
                    topic: topic.to_string(),
                    payload,
                });
            }
        }
    }

    fn detach(&self, id: u64) {
        let mut inner = self.inner.lock();
        if let Some(index) = inner.peers.iter().position(|peer| peer.id == id) {
            let peer = inner.peers.swap_remove(index);
            let _ = peer.events.try_send(SessionEvent::Disconnected);
        }
    }
}

/// One attached client of a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemorySession {
    broker: Arc<MemoryBroker>,
    id: u64,
}

#[async_trait]
impl Session for MemorySession {
    async fn subscribe(&self, topic: &str) -> SessionResult<()> {
        self.broker.subscribe(self.id, topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> SessionResult<()> {
        self.broker.publish(topic, payload, retain);
        Ok(())
    }

    async fn disconnect(&self) -> SessionResult<()> {
        self.broker.detach(self.id);
        Ok(())
    }
}

/// A session that refuses every publish, for exercising the send worker's
/// retry path.
#[derive(Debug, Default)]
pub struct FailingSession;

#[async_trait]
impl Session for FailingSession {
    async fn subscribe(&self, topic: &str) -> SessionResult<()> {
        Err(SessionError::Subscribe {
            topic: topic.to_string(),
            reason: "always fails".to_string(),
        })
    }

    async fn publish(&self, topic: &str, _payload: Bytes, _retain: bool) -> SessionResult<()> {
        Err(SessionError::Publish {
            topic: topic.to_string(),
            reason: "always fails".to_string(),
        })
    }

    async fn disconnect(&self) -> SessionResult<()> {
        Ok(())
    }
}
