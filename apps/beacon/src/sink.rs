use std::path::{Path, PathBuf};

use async_trait::async_trait;
use beacon_core::{Rendezvous, DEFAULT_RECORD_SEPARATOR};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write rendezvous record to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where a received rendezvous value ends up. The communicator only hands the
/// decoded value over; what "persist" means is the sink's concern.
#[async_trait]
pub trait RendezvousSink: Send + Sync {
    async fn store(&self, rendezvous: &Rendezvous) -> Result<(), SinkError>;
}

/// Writes the single record line to a fixed path, replacing any previous
/// content. The format matches what the tooling on the receiving machine
/// parses: `<address><sep><port><sep>`.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
    separator: char,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            separator: DEFAULT_RECORD_SEPARATOR,
        }
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RendezvousSink for FileSink {
    async fn store(&self, rendezvous: &Rendezvous) -> Result<(), SinkError> {
        let line = rendezvous.record_line(self.separator);
        tokio::fs::write(&self.path, line)
            .await
            .map_err(|source| SinkError::Io {
                path: self.path.clone(),
                source,
            })?;
        info!(
            target: "beacon.sink",
            path = %self.path.display(),
            address = %rendezvous.address,
            port = %rendezvous.port,
            "rendezvous record written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_the_record_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("addr_port_ngrok.txt");
        let sink = FileSink::new(&path);

        sink.store(&Rendezvous::new("2.tcp.eu.ngrok.io", "17152"))
            .await
            .expect("store");

        let written = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(written, "2.tcp.eu.ngrok.io:17152:");
    }

    #[tokio::test]
    async fn overwrites_previous_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("addr_port_ngrok.txt");
        let sink = FileSink::new(&path);

        sink.store(&Rendezvous::new("old.example", "1"))
            .await
            .expect("store old");
        sink.store(&Rendezvous::new("new.example", "2"))
            .await
            .expect("store new");

        let written = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(written, "new.example:2:");
    }

    #[tokio::test]
    async fn surfaces_io_failures() {
        let sink = FileSink::new("/nonexistent-dir/beacon/record.txt");
        let err = sink
            .store(&Rendezvous::new("a", "1"))
            .await
            .expect_err("should fail");
        assert!(matches!(err, SinkError::Io { .. }));
    }
}
