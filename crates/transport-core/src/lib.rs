//! Transport-agnostic connection contracts for the Framelink RPC protocol.
//!
//! A transport (WebSocket, TCP, ...) accepts connections and hands each one
//! to a [`ConnectionAcceptor`] as a [`FrameStream`]: an ordered duplex
//! channel of opaque application frame payloads. The protocol layer above
//! drives the RPC session over that stream; this crate knows nothing about
//! message encoding.

pub mod acceptor;
pub mod error;
pub mod stream;

pub use acceptor::{AcceptorFuture, ConnectionAcceptor};
pub use error::ConnectionError;
pub use stream::{FrameSender, FrameStream, SendError};

/// Capacity of the per-direction frame channels.
///
/// Bounded so a stalled peer (or a slow acceptor) applies backpressure to
/// the other side instead of queueing without limit.
pub const FRAME_BUFFER_SIZE: usize = 64;
