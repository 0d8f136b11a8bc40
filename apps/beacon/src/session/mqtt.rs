use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS, Transport,
};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, error, warn};

use super::{Session, SessionError, SessionEvent, SessionResult, EVENT_CHANNEL_DEPTH};
use crate::config::BrokerConfig;

/// [`Session`] over a real MQTT broker via `rumqttc`. The client's event loop
/// runs on a dedicated pump task that translates protocol events into
/// [`SessionEvent`]s; keep-alive pings are the client's own business.
pub struct MqttSession {
    client: AsyncClient,
}

impl MqttSession {
    /// Connects over TLS with the configured credentials and returns the
    /// session together with its event stream. Waits for the broker's
    /// CONNACK with no timeout; a rejected or failed attempt is fatal and is
    /// not retried.
    pub async fn connect(
        config: &BrokerConfig,
    ) -> SessionResult<(Self, mpsc::Receiver<SessionEvent>)> {
        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.host.clone(),
            config.port,
        );
        options.set_credentials(config.username.clone(), config.password.clone());
        options.set_keep_alive(config.keep_alive);
        options.set_transport(Transport::tls_with_default_config());

        let (client, mut event_loop) = AsyncClient::new(options, EVENT_CHANNEL_DEPTH);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);

        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        let _ = events_tx.send(SessionEvent::Connected).await;
                        break;
                    }
                    return Err(SessionError::Connect(format!(
                        "broker rejected the connection: {:?}",
                        ack.code
                    )));
                }
                Ok(event) => debug!(target: "beacon.session", ?event, "pre-connack event"),
                Err(err) => return Err(SessionError::Connect(err.to_string())),
            }
        }

        tokio::spawn(pump(event_loop, events_tx));
        Ok((Self { client }, events_rx))
    }
}

/// Consecutive poll failures after which the connection is declared dead.
/// The client reconnects on the next poll after an error, so a single
/// failure is an outage to ride out; only a persistent one is fatal.
const MAX_CONSECUTIVE_POLL_ERRORS: u32 = 5;

/// Pause between reconnect attempts, so a dead broker is not hammered.
const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

/// Drives the client's I/O loop and forwards what the owner cares about.
/// Transient connection loss stays inside this task: the owner sees
/// `Disconnected`, then `Connected` again once the client's reconnect lands
/// a new CONNACK. Exits when the event stream has no consumer left or the
/// connection stays down past the error threshold.
async fn pump(mut event_loop: EventLoop, events: mpsc::Sender<SessionEvent>) {
    let mut consecutive_errors: u32 = 0;
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                consecutive_errors = 0;
                let message = SessionEvent::Message {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                };
                if events.send(message).await.is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                consecutive_errors = 0;
                if events.send(SessionEvent::Connected).await.is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!(target: "beacon.session", "broker sent a disconnect");
                if events.send(SessionEvent::Disconnected).await.is_err() {
                    break;
                }
            }
            Ok(_) => {
                consecutive_errors = 0;
            }
            Err(err) => {
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_POLL_ERRORS {
                    error!(
                        target: "beacon.session",
                        error = %err,
                        attempts = consecutive_errors,
                        "broker connection declared dead"
                    );
                    let _ = events.send(SessionEvent::Failed(err.to_string())).await;
                    break;
                }
                warn!(
                    target: "beacon.session",
                    error = %err,
                    attempts = consecutive_errors,
                    "broker connection lost, waiting for the client to reconnect"
                );
                if consecutive_errors == 1
                    && events.send(SessionEvent::Disconnected).await.is_err()
                {
                    break;
                }
                time::sleep(RECONNECT_PAUSE).await;
            }
        }
    }
    debug!(target: "beacon.session", "event pump finished");
}

#[async_trait]
impl Session for MqttSession {
    async fn subscribe(&self, topic: &str) -> SessionResult<()> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|err| SessionError::Subscribe {
                topic: topic.to_string(),
                reason: err.to_string(),
            })
    }

    async fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> SessionResult<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|err| SessionError::Publish {
                topic: topic.to_string(),
                reason: err.to_string(),
            })
    }

    async fn disconnect(&self) -> SessionResult<()> {
        self.client
            .disconnect()
            .await
            .map_err(|_| SessionError::Closed)
    }
}
