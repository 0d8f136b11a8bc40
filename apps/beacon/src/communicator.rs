use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_core::{Topic, TopicScheme};
use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, timeout};
use tracing::{debug, error, info, warn};

use crate::config::{BrokerConfig, CommunicatorOptions};
use crate::queue::{OutboundItem, OutboundQueue, OutboundReceiver, QueueError};
use crate::role::{RoleBehavior, RoleContext};
use crate::session::{MqttSession, Session, SessionError, SessionEvent};

/// Flags shared between the dispatch worker, the send worker, and the
/// façade. Every flag moves false→true exactly once and is never reverted,
/// so relaxed atomics are all the portability this needs.
#[derive(Debug, Default)]
pub struct CommunicatorState {
    connected: AtomicBool,
    sent_rendezvous: AtomicBool,
    received_rendezvous: AtomicBool,
    failed: AtomicBool,
    stopped: AtomicBool,
}

impl CommunicatorState {
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn sent_rendezvous(&self) -> bool {
        self.sent_rendezvous.load(Ordering::Relaxed)
    }

    pub fn received_rendezvous(&self) -> bool {
        self.received_rendezvous.load(Ordering::Relaxed)
    }

    /// True once the broker connection failed for good.
    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// The one-shot duty is discharged once the rendezvous value went out
    /// (producer) or came in (consumer). Never both in one instance.
    pub fn duty_done(&self) -> bool {
        self.sent_rendezvous() || self.received_rendezvous()
    }

    pub(crate) fn mark_connected(&self) {
        self.connected.store(true, Ordering::Relaxed);
    }

    pub(crate) fn mark_sent(&self) {
        self.sent_rendezvous.store(true, Ordering::Relaxed);
    }

    pub fn mark_received(&self) {
        self.received_rendezvous.store(true, Ordering::Relaxed);
    }

    pub(crate) fn mark_failed(&self) {
        self.failed.store(true, Ordering::Relaxed);
    }

    pub(crate) fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}

/// Bidirectional, self-terminating wrapper around one broker connection.
///
/// Two background tasks run per instance: the dispatch worker consumes the
/// session's event stream and routes it through the role's hooks, and the
/// send worker drains the outbound queue into retained at-least-once
/// publishes. The owner only enqueues via [`send_to`](Self::send_to) and
/// watches [`is_alive`](Self::is_alive) / [`done`](Self::done); shutdown is
/// the send worker noticing its own stop condition, never an external
/// signal.
pub struct Communicator {
    outbound: OutboundQueue,
    state: Arc<CommunicatorState>,
    topics: TopicScheme,
    done: watch::Receiver<bool>,
    dispatch: JoinHandle<()>,
    sender: JoinHandle<()>,
}

impl Communicator {
    /// Connects to the broker over TLS and assembles a communicator around
    /// the live session. A rejected connection attempt is returned as-is;
    /// there is no retry.
    pub async fn connect(
        broker: &BrokerConfig,
        options: CommunicatorOptions,
        role: Arc<dyn RoleBehavior>,
    ) -> Result<Self, SessionError> {
        let (session, events) = MqttSession::connect(broker).await?;
        Ok(Self::with_session(Arc::new(session), events, options, role))
    }

    /// Assembles a communicator around an already-connected session. This is
    /// the seam the in-memory broker plugs into.
    pub fn with_session(
        session: Arc<dyn Session>,
        events: mpsc::Receiver<SessionEvent>,
        options: CommunicatorOptions,
        role: Arc<dyn RoleBehavior>,
    ) -> Self {
        let state = Arc::new(CommunicatorState::default());
        let (outbound, items) = OutboundQueue::bounded(options.queue_capacity, options.overflow);
        let (done_tx, done_rx) = watch::channel(false);

        let ctx = RoleContext {
            session: Arc::clone(&session),
            outbound: outbound.clone(),
            state: Arc::clone(&state),
            topics: options.topics.clone(),
        };
        let dispatch = tokio::spawn(dispatch_worker(events, role, ctx));
        let sender = tokio::spawn(send_worker(SendWorker {
            session,
            items,
            state: Arc::clone(&state),
            credentials_topic: options.topics.resolve(Topic::Credentials),
            self_terminate: options.self_terminate,
            poll_interval: options.poll_interval,
            done: done_tx,
        }));

        Self {
            outbound,
            state,
            topics: options.topics,
            done: done_rx,
            dispatch,
            sender,
        }
    }

    /// Enqueues a payload for the send worker. Never publishes directly; the
    /// only way this blocks the caller is queue backpressure under the
    /// `Block` overflow policy.
    pub async fn send_to(
        &self,
        topic: Topic,
        payload: impl Into<Bytes>,
    ) -> Result<(), QueueError> {
        self.outbound
            .enqueue(OutboundItem {
                topic: self.topics.resolve(topic),
                payload: payload.into(),
            })
            .await
    }

    /// True until the send worker has reached its stop condition.
    pub fn is_alive(&self) -> bool {
        !self.state.stopped()
    }

    pub fn state(&self) -> &CommunicatorState {
        &self.state
    }

    /// Resolves once the send worker has stopped. Never resolves for an
    /// instance configured to stay running.
    pub async fn done(&self) {
        let mut done = self.done.clone();
        while !*done.borrow() {
            if done.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        self.dispatch.abort();
        self.sender.abort();
    }
}

/// Consumes the session's event stream and routes it through the role's
/// hooks. Hook errors are logged and swallowed; nothing may escape this task.
async fn dispatch_worker(
    mut events: mpsc::Receiver<SessionEvent>,
    role: Arc<dyn RoleBehavior>,
    ctx: RoleContext,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Connected => {
                ctx.state.mark_connected();
                debug!(target: "beacon.dispatch", role = role.name(), "broker connection established");
                if let Err(err) = role.on_connected(&ctx).await {
                    warn!(
                        target: "beacon.dispatch",
                        role = role.name(),
                        error = %err,
                        "connect hook failed"
                    );
                }
            }
            SessionEvent::Disconnected => {
                warn!(target: "beacon.dispatch", role = role.name(), "broker connection lost");
            }
            SessionEvent::Message { topic, payload } => {
                if let Err(err) = role.on_message(&topic, payload, &ctx).await {
                    warn!(
                        target: "beacon.dispatch",
                        role = role.name(),
                        %topic,
                        error = %err,
                        "message hook failed"
                    );
                }
            }
            SessionEvent::Failed(reason) => {
                error!(
                    target: "beacon.dispatch",
                    role = role.name(),
                    %reason,
                    "broker session failed, shutting down"
                );
                ctx.state.mark_failed();
                break;
            }
        }
    }
    debug!(target: "beacon.dispatch", "dispatch worker finished");
}

struct SendWorker {
    session: Arc<dyn Session>,
    items: OutboundReceiver,
    state: Arc<CommunicatorState>,
    credentials_topic: String,
    self_terminate: bool,
    poll_interval: Duration,
    done: watch::Sender<bool>,
}

/// Drains the outbound queue into retained, at-least-once publishes and
/// re-evaluates the stop condition every cycle. A failed publish keeps the
/// item in a holding slot, so nothing is lost and FIFO order is preserved.
async fn send_worker(mut worker: SendWorker) {
    let mut pending: Option<OutboundItem> = None;
    let mut queue_closed = false;

    loop {
        // Items stay queued until the connection is up, so enqueue
        // backpressure keeps working while we wait for the broker.
        let mut waited = false;
        if worker.state.connected() && pending.is_none() && !queue_closed {
            waited = true;
            pending = match timeout(worker.poll_interval, worker.items.recv()).await {
                Ok(Some(item)) => Some(item),
                Ok(None) => {
                    queue_closed = true;
                    None
                }
                // Queue was empty for a whole cycle.
                Err(_) => None,
            };
        }
        if !waited {
            time::sleep(worker.poll_interval).await;
        }

        if worker.state.connected() {
            if let Some(item) = pending.take() {
                match worker
                    .session
                    .publish(&item.topic, item.payload.clone(), true)
                    .await
                {
                    Ok(()) => {
                        debug!(
                            target: "beacon.send",
                            topic = %item.topic,
                            bytes = item.payload.len(),
                            "published retained message"
                        );
                        if item.topic == worker.credentials_topic {
                            worker.state.mark_sent();
                        }
                    }
                    Err(err) => {
                        warn!(
                            target: "beacon.send",
                            topic = %item.topic,
                            error = %err,
                            "publish failed, holding item for retry"
                        );
                        pending = Some(item);
                    }
                }
            }
        }

        if worker.state.failed() {
            break;
        }
        if worker.self_terminate
            && pending.is_none()
            && worker.items.is_empty()
            && worker.state.duty_done()
        {
            break;
        }
    }

    if let Err(err) = worker.session.disconnect().await {
        debug!(target: "beacon.send", error = %err, "disconnect after stop failed");
    }
    worker.state.mark_stopped();
    let _ = worker.done.send(true);
    info!(
        target: "beacon.send",
        sent = worker.state.sent_rendezvous(),
        received = worker.state.received_rendezvous(),
        "send worker stopped"
    );
}
