//! The duplex application-frame stream handed to a connection acceptor.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::ConnectionError;

/// Handle for sending application frames to the remote peer.
///
/// Cloneable and cheap — wraps an `mpsc::Sender`. Sends apply channel
/// backpressure: `send` suspends while the transport's write side is busy.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Bytes>,
}

impl FrameSender {
    /// Wraps the outbound frame channel of a transport connection.
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Sends one application frame, waiting for channel capacity.
    ///
    /// Returns `Err` only if the connection is closed.
    pub async fn send(&self, frame: Bytes) -> Result<(), SendError> {
        self.tx.send(frame).await.map_err(|_| SendError)
    }

    /// Sends one application frame without waiting.
    ///
    /// Returns `Err` if the send buffer is full or the connection is closed.
    pub fn try_send(&self, frame: Bytes) -> Result<(), SendError> {
        self.tx.try_send(frame).map_err(|_| SendError)
    }

    /// Returns `true` if the connection's write side is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the send buffer is full or the connection is closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// One accepted connection, seen as an ordered duplex stream of opaque
/// frame payloads.
///
/// The receive side yields application frames in the order the peer sent
/// them; transport-level control frames (ping/pong) are consumed below this
/// layer and never appear here. `None` means the peer closed cleanly;
/// `Some(Err(_))` is the terminal fault signal.
pub struct FrameStream {
    peer_addr: SocketAddr,
    rx: mpsc::Receiver<Result<Bytes, ConnectionError>>,
    sender: FrameSender,
}

impl FrameStream {
    /// Builds a stream from a transport's inbound channel and send handle.
    pub fn new(
        peer_addr: SocketAddr,
        rx: mpsc::Receiver<Result<Bytes, ConnectionError>>,
        sender: FrameSender,
    ) -> Self {
        Self {
            peer_addr,
            rx,
            sender,
        }
    }

    /// Receives the next application frame.
    ///
    /// Resolves to `None` once the connection has closed cleanly, or to
    /// `Some(Err(_))` once if the connection faulted; no frames follow a
    /// fault.
    pub async fn recv(&mut self) -> Option<Result<Bytes, ConnectionError>> {
        self.rx.recv().await
    }

    /// Returns a cloneable [`FrameSender`] for this connection.
    pub fn sender(&self) -> FrameSender {
        self.sender.clone()
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}
