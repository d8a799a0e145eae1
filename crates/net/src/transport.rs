//! Transport seam between the session loop and the wire.
//!
//! A transport moves whole frames; it does not interpret them. The real
//! socket lives outside this crate; [`ChannelTransport`] connects two
//! in-process endpoints for tests and local tooling.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

/// Default frame capacity for each direction of a [`ChannelTransport`] pair.
const CHANNEL_CAPACITY: usize = 1024;

/// Bidirectional frame pipe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one complete frame.
    async fn send(&mut self, frame: Vec<u8>) -> Result<()>;

    /// Receive the next frame, or `None` once the peer has gone away.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>>;
}

/// In-memory transport backed by tokio channels.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChannelTransport {
    /// Two connected endpoints: frames sent on one arrive on the other.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_capacity(CHANNEL_CAPACITY)
    }

    /// Like [`ChannelTransport::pair`] with an explicit per-direction capacity.
    pub fn pair_with_capacity(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        trace!(bytes = frame.len(), "channel send");
        self.tx
            .send(frame)
            .await
            .map_err(|_| anyhow!("peer transport closed"))
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_is_bidirectional() {
        let (mut client, mut server) = ChannelTransport::pair();
        client.send(vec![1, 2, 3]).await.unwrap();
        server.send(vec![9]).await.unwrap();
        assert_eq!(server.recv().await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(client.recv().await.unwrap(), Some(vec![9]));
    }

    #[tokio::test]
    async fn test_dropped_peer() {
        let (mut client, server) = ChannelTransport::pair();
        drop(server);
        assert!(client.send(vec![0]).await.is_err());
        assert_eq!(client.recv().await.unwrap(), None);
    }
}
