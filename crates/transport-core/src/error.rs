//! Error types for per-connection faults.

/// A fault on one accepted connection.
///
/// Delivered as the terminal item on a [`FrameStream`](crate::FrameStream)
/// when the connection dies mid-stream. `Clone` because it travels through
/// the frame channel. Isolated to the connection it occurred on; the
/// listening transport and other connections are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The underlying transport failed (write error, peer reset, ...).
    #[error("transport fault: {0}")]
    Transport(String),

    /// The peer violated the framing protocol (malformed or oversized frame).
    #[error("protocol violation: {0}")]
    Protocol(String),
}
