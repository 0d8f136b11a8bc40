//! Beacon exchanges a single rendezvous value (a public tunnel address and
//! port) between two short-lived processes through an MQTT broker. The
//! producer publishes the value as a retained message; the consumer may
//! subscribe long after the producer has gone away and still receive it, so
//! the two sides never need to be online at the same time.
//!
//! The moving parts:
//! - [`session`]: the broker connection and its event stream, plus an
//!   in-process broker with retained-message semantics for tests
//! - [`queue`]: the bounded outbound FIFO feeding the send worker
//! - [`role`]: producer/consumer behavior hooks driven by broker events
//! - [`communicator`]: the façade tying the workers together and deciding
//!   when the owning process is done

pub mod communicator;
pub mod config;
pub mod queue;
pub mod role;
pub mod session;
pub mod sink;
pub mod telemetry;

pub use communicator::{Communicator, CommunicatorState};
pub use config::{BrokerConfig, CommunicatorOptions, OverflowPolicy};
pub use queue::{OutboundItem, OutboundQueue, QueueError};
pub use role::{Consumer, Producer, RoleBehavior, RoleContext};
pub use session::{MemoryBroker, MemorySession, MqttSession, Session, SessionError, SessionEvent};
pub use sink::{FileSink, RendezvousSink, SinkError};
