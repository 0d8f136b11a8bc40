use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::config::OverflowPolicy;

pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// One pending publish: full topic path plus payload. Created by
/// [`crate::Communicator::send_to`], consumed when the send worker publishes
/// it to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundItem {
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("outbound queue is full")]
    Full,
    #[error("outbound queue is closed")]
    Closed,
}

/// Sender half of the bounded outbound FIFO. Cloneable; every producer of
/// outbound traffic (the façade, the producer role's connect hook) holds one.
/// FIFO ordering is the channel's own, so successive enqueues from one role
/// reach the broker in order.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<OutboundItem>,
    overflow: OverflowPolicy,
}

/// Receiver half, owned exclusively by the send worker.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<OutboundItem>,
}

impl OutboundQueue {
    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, overflow }, OutboundReceiver { rx })
    }

    /// Enqueues an item. At capacity this either waits for a free slot or
    /// fails with [`QueueError::Full`], per the configured overflow policy.
    pub async fn enqueue(&self, item: OutboundItem) -> Result<(), QueueError> {
        match self.overflow {
            OverflowPolicy::Block => self.tx.send(item).await.map_err(|_| QueueError::Closed),
            OverflowPolicy::Reject => self.tx.try_send(item).map_err(|err| match err {
                TrySendError::Full(_) => QueueError::Full,
                TrySendError::Closed(_) => QueueError::Closed,
            }),
        }
    }
}

impl OutboundReceiver {
    pub async fn recv(&mut self) -> Option<OutboundItem> {
        self.rx.recv().await
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
