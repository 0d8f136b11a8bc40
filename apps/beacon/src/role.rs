use std::sync::Arc;

use async_trait::async_trait;
use beacon_core::{Rendezvous, Topic, TopicScheme};
use bytes::Bytes;
use thiserror::Error;
use tracing::{info, trace, warn};

use crate::communicator::CommunicatorState;
use crate::queue::{OutboundItem, OutboundQueue, QueueError};
use crate::session::{Session, SessionError};
use crate::sink::{RendezvousSink, SinkError};

/// Payload of the liveness announcement the producer publishes on connect.
pub const ALIVE_ANNOUNCEMENT: &[u8] = b"online";

#[derive(Debug, Error)]
pub enum RoleError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Everything a role may touch while reacting to broker events.
pub struct RoleContext {
    pub session: Arc<dyn Session>,
    pub outbound: OutboundQueue,
    pub state: Arc<CommunicatorState>,
    pub topics: TopicScheme,
}

/// Role-specific reactions to broker events, fixed at construction. The two
/// roles are deliberately asymmetric: a producer subscribes to nothing and a
/// consumer subscribes to exactly one topic.
#[async_trait]
pub trait RoleBehavior: Send + Sync {
    fn name(&self) -> &'static str;
    async fn on_connected(&self, ctx: &RoleContext) -> Result<(), RoleError>;
    async fn on_message(
        &self,
        topic: &str,
        payload: Bytes,
        ctx: &RoleContext,
    ) -> Result<(), RoleError>;
}

/// The side holding fresh tunnel details. Announces itself on connect and has
/// no inbound data dependency at all.
pub struct Producer;

#[async_trait]
impl RoleBehavior for Producer {
    fn name(&self) -> &'static str {
        "producer"
    }

    async fn on_connected(&self, ctx: &RoleContext) -> Result<(), RoleError> {
        ctx.outbound
            .enqueue(OutboundItem {
                topic: ctx.topics.resolve(Topic::Alive),
                payload: Bytes::from_static(ALIVE_ANNOUNCEMENT),
            })
            .await?;
        Ok(())
    }

    async fn on_message(
        &self,
        topic: &str,
        _payload: Bytes,
        _ctx: &RoleContext,
    ) -> Result<(), RoleError> {
        trace!(target: "beacon.role", %topic, "producer ignores inbound traffic");
        Ok(())
    }
}

/// The side waiting for the tunnel details. Subscribes to the credentials
/// topic at-least-once; the broker replays the retained value if the producer
/// published before we connected.
pub struct Consumer {
    sink: Arc<dyn RendezvousSink>,
}

impl Consumer {
    pub fn new(sink: Arc<dyn RendezvousSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl RoleBehavior for Consumer {
    fn name(&self) -> &'static str {
        "consumer"
    }

    async fn on_connected(&self, ctx: &RoleContext) -> Result<(), RoleError> {
        let topic = ctx.topics.resolve(Topic::Credentials);
        ctx.session.subscribe(&topic).await?;
        info!(target: "beacon.role", %topic, "waiting for the rendezvous value");
        Ok(())
    }

    async fn on_message(
        &self,
        topic: &str,
        payload: Bytes,
        ctx: &RoleContext,
    ) -> Result<(), RoleError> {
        if !ctx.topics.matches(topic, Topic::Credentials) {
            trace!(target: "beacon.role", %topic, "ignoring message on unrelated topic");
            return Ok(());
        }

        // A garbage payload is dropped and we keep listening; the retained
        // slot may still be overwritten with a valid one.
        let rendezvous = match Rendezvous::decode_payload(&payload) {
            Ok(rendezvous) => rendezvous,
            Err(err) => {
                warn!(
                    target: "beacon.role",
                    %topic,
                    error = %err,
                    "dropping malformed rendezvous payload"
                );
                return Ok(());
            }
        };

        // Persist before latching the flag: the stop condition (and with it
        // the owner's completion signal) must not fire while the value is
        // still in flight to the sink.
        self.sink.store(&rendezvous).await?;
        ctx.state.mark_received();
        info!(
            target: "beacon.role",
            address = %rendezvous.address,
            port = %rendezvous.port,
            "rendezvous value received"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverflowPolicy;
    use crate::session::{MemoryBroker, SessionEvent};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CaptureSink {
        stored: Mutex<Vec<Rendezvous>>,
    }

    #[async_trait]
    impl RendezvousSink for CaptureSink {
        async fn store(&self, rendezvous: &Rendezvous) -> Result<(), SinkError> {
            self.stored.lock().push(rendezvous.clone());
            Ok(())
        }
    }

    fn context() -> (RoleContext, crate::queue::OutboundReceiver) {
        let broker = MemoryBroker::new();
        let (session, _events) = broker.open();
        let (outbound, receiver) = OutboundQueue::bounded(4, OverflowPolicy::Block);
        (
            RoleContext {
                session: Arc::new(session),
                outbound,
                state: Arc::new(CommunicatorState::default()),
                topics: TopicScheme::default(),
            },
            receiver,
        )
    }

    #[tokio::test]
    async fn producer_enqueues_alive_announcement_on_connect() {
        let (ctx, mut receiver) = context();
        Producer.on_connected(&ctx).await.expect("on_connected");

        let item = receiver.recv().await.expect("queued item");
        assert_eq!(item.topic, "remote_rpi/al");
        assert_eq!(item.payload, Bytes::from_static(ALIVE_ANNOUNCEMENT));
    }

    #[tokio::test]
    async fn producer_ignores_inbound_messages() {
        let (ctx, _receiver) = context();
        Producer
            .on_message("remote_rpi/ngrok", Bytes::from_static(b"{}"), &ctx)
            .await
            .expect("on_message");
        assert!(!ctx.state.received_rendezvous());
    }

    #[tokio::test]
    async fn consumer_subscribes_to_the_credentials_topic() {
        let broker = MemoryBroker::new();
        let (session, mut events) = broker.open();
        assert_eq!(events.recv().await, Some(SessionEvent::Connected));
        let (outbound, _receiver) = OutboundQueue::bounded(4, OverflowPolicy::Block);
        let ctx = RoleContext {
            session: Arc::new(session),
            outbound,
            state: Arc::new(CommunicatorState::default()),
            topics: TopicScheme::default(),
        };

        let sink = Arc::new(CaptureSink::default());
        Consumer::new(sink)
            .on_connected(&ctx)
            .await
            .expect("on_connected");

        // A retained value published before we subscribed would now be
        // replayed; prove the subscription is live instead.
        let (publisher, _publisher_events) = broker.open();
        publisher
            .publish(
                "remote_rpi/ngrok",
                Bytes::from_static(b"{\"addr\":\"a\",\"port\":\"1\"}"),
                true,
            )
            .await
            .expect("publish");
        assert_eq!(
            events.recv().await,
            Some(SessionEvent::Message {
                topic: "remote_rpi/ngrok".to_string(),
                payload: Bytes::from_static(b"{\"addr\":\"a\",\"port\":\"1\"}"),
            })
        );
    }

    #[tokio::test]
    async fn consumer_decodes_and_stores_the_rendezvous_value() {
        let (ctx, _receiver) = context();
        let sink = Arc::new(CaptureSink::default());
        let consumer = Consumer::new(Arc::clone(&sink) as Arc<dyn RendezvousSink>);

        consumer
            .on_message(
                "remote_rpi/ngrok",
                Bytes::from_static(b"{\"addr\":\"2.tcp.eu.ngrok.io\",\"port\":\"17152\"}"),
                &ctx,
            )
            .await
            .expect("on_message");

        assert!(ctx.state.received_rendezvous());
        assert_eq!(
            sink.stored.lock().as_slice(),
            [Rendezvous::new("2.tcp.eu.ngrok.io", "17152")]
        );
    }

    struct RejectingSink;

    #[async_trait]
    impl RendezvousSink for RejectingSink {
        async fn store(&self, _rendezvous: &Rendezvous) -> Result<(), SinkError> {
            Err(SinkError::Io {
                path: "/nowhere/record.txt".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "refused"),
            })
        }
    }

    #[tokio::test]
    async fn consumer_leaves_received_clear_when_the_sink_fails() {
        let (ctx, _receiver) = context();
        let consumer = Consumer::new(Arc::new(RejectingSink));

        consumer
            .on_message(
                "remote_rpi/ngrok",
                Bytes::from_static(b"{\"addr\":\"a\",\"port\":\"1\"}"),
                &ctx,
            )
            .await
            .expect_err("sink failure must surface");

        // Without a persisted value the duty is not discharged.
        assert!(!ctx.state.received_rendezvous());
    }

    #[tokio::test]
    async fn consumer_drops_malformed_payloads_and_keeps_waiting() {
        let (ctx, _receiver) = context();
        let sink = Arc::new(CaptureSink::default());
        let consumer = Consumer::new(Arc::clone(&sink) as Arc<dyn RendezvousSink>);

        consumer
            .on_message("remote_rpi/ngrok", Bytes::from_static(b"not json"), &ctx)
            .await
            .expect("malformed payload must not error out of the dispatch path");

        assert!(!ctx.state.received_rendezvous());
        assert!(sink.stored.lock().is_empty());
    }

    #[tokio::test]
    async fn consumer_ignores_unrelated_topics() {
        let (ctx, _receiver) = context();
        let sink = Arc::new(CaptureSink::default());
        let consumer = Consumer::new(Arc::clone(&sink) as Arc<dyn RendezvousSink>);

        consumer
            .on_message(
                "remote_rpi/al",
                Bytes::from_static(b"{\"addr\":\"a\",\"port\":\"1\"}"),
                &ctx,
            )
            .await
            .expect("on_message");

        assert!(!ctx.state.received_rendezvous());
        assert!(sink.stored.lock().is_empty());
    }
}
