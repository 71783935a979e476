//! The seam between the protocol engine and whatever moves bytes.
//!
//! The engine's contract with a transport is deliberately narrow:
//! ordered, reliable byte chunks in each direction, a closed signal,
//! and nothing else. Secure handshakes, sockets, and reconnects all
//! live on the far side of these traits.

use std::future::Future;

use bytes::Bytes;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The connection is gone; no bytes will ever move again.
    #[error("transport closed")]
    Closed,

    /// A blocking wait for transport data exceeded the configured
    /// bound. No retry is attempted at this layer.
    #[error("timed out waiting for transport data")]
    Timeout,

    /// Transport-level I/O failure.
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Receiving half of a connection's transport: yields the next inbound
/// byte chunk, or `None` once the peer closed the connection.
///
/// Chunk boundaries carry no meaning; the engine reassembles frames
/// across them. Receive timeouts are applied by the caller.
pub trait TransportRx {
    fn receive(&mut self) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send;
}

/// Sending half of a connection's transport: fire-and-forget, ordered
/// delivery.
pub trait TransportTx {
    fn send(&mut self, bytes: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// In-memory sending half, backed by a tokio channel.
pub struct ChannelTx {
    tx: mpsc::Sender<Bytes>,
}

/// In-memory receiving half, backed by a tokio channel.
pub struct ChannelRx {
    rx: mpsc::Receiver<Bytes>,
}

impl TransportTx for ChannelTx {
    async fn send(&mut self, bytes: Bytes) -> Result<(), TransportError> {
        self.tx.send(bytes).await.map_err(|_| TransportError::Closed)
    }
}

impl TransportRx for ChannelRx {
    async fn receive(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

/// Two connected in-memory transport endpoints: bytes sent through one
/// side's [ChannelTx] arrive, in order, at the other side's
/// [ChannelRx]. This is what the engine's tests run over.
pub fn channel_pair(capacity: usize) -> ((ChannelTx, ChannelRx), (ChannelTx, ChannelRx)) {
    let (a_to_b_tx, a_to_b_rx) = mpsc::channel(capacity);
    let (b_to_a_tx, b_to_a_rx) = mpsc::channel(capacity);
    (
        (ChannelTx { tx: a_to_b_tx }, ChannelRx { rx: b_to_a_rx }),
        (ChannelTx { tx: b_to_a_tx }, ChannelRx { rx: a_to_b_rx }),
    )
}
