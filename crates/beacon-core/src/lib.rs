//! Shared primitives for the beacon rendezvous exchange: the wire payload
//! carrying a tunnel endpoint, the broker topic scheme, and the on-disk
//! record format read by tooling on the receiving machine. These live in one
//! crate so the producing and consuming sides never drift apart on message
//! shapes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Namespace prefix shared by every topic of one logical deployment, so the
/// broker can scope retained state per deployment.
pub const DEFAULT_TOPIC_PREFIX: &str = "remote_rpi/";

/// Separator used in the persisted record line.
pub const DEFAULT_RECORD_SEPARATOR: char = ':';

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed rendezvous payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("malformed rendezvous record: {0}")]
    Record(String),
}

/// The public address/port pair that lets the consumer locate the producer's
/// tunnel endpoint. Immutable once constructed; produced exactly once per
/// tunnel and consumed exactly once on the receiving side.
///
/// The wire encoding is JSON with field names `addr` and `port`, decoded by
/// field name so key order never matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendezvous {
    #[serde(rename = "addr")]
    pub address: String,
    pub port: String,
}

impl Rendezvous {
    pub fn new(address: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: port.into(),
        }
    }

    pub fn encode_payload(&self) -> Result<Bytes, WireError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode_payload(payload: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Renders the persisted record line `<address><sep><port><sep>`.
    ///
    /// The trailing separator is intentional: splitting the line on the
    /// separator yields a known-length result with a clean port field even if
    /// the file picked up trailing artifacts.
    pub fn record_line(&self, separator: char) -> String {
        format!(
            "{addr}{sep}{port}{sep}",
            addr = self.address,
            port = self.port,
            sep = separator
        )
    }

    /// Parses a record line written by [`Rendezvous::record_line`].
    pub fn parse_record_line(line: &str, separator: char) -> Result<Self, WireError> {
        let mut parts = line.trim_end_matches(['\r', '\n']).split(separator);
        let address = parts.next().filter(|part| !part.is_empty());
        let port = parts.next().filter(|part| !part.is_empty());
        match (address, port, parts.next(), parts.next()) {
            (Some(address), Some(port), Some(""), None) => Ok(Self::new(address, port)),
            _ => Err(WireError::Record(format!(
                "expected <address>{separator}<port>{separator}, got {line:?}"
            ))),
        }
    }
}

/// Logical names for the topics one deployment uses. `All` is the broker
/// wildcard and is never published to; it exists for ad-hoc inspection of a
/// deployment's namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    All,
    Alive,
    Credentials,
}

impl Topic {
    pub fn suffix(self) -> &'static str {
        match self {
            Topic::All => "#",
            Topic::Alive => "al",
            Topic::Credentials => "ngrok",
        }
    }
}

/// Resolves logical topic names to full broker paths under a shared prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    prefix: String,
}

impl TopicScheme {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn resolve(&self, topic: Topic) -> String {
        format!("{}{}", self.prefix, topic.suffix())
    }

    pub fn matches(&self, path: &str, topic: Topic) -> bool {
        path == self.resolve(topic)
    }
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIX)
    }
}
