//! WebSocket server transport for the Framelink RPC protocol.
//!
//! Binds a listening address, upgrades inbound HTTP connections to
//! WebSocket (attaching caller-supplied transport headers to the upgrade
//! response), and hands each upgraded connection to a
//! [`ConnectionAcceptor`](framelink_transport_core::ConnectionAcceptor) as
//! an ordered duplex frame stream. WebSocket ping/pong control frames are
//! answered at the transport level and never reach the acceptor.

mod connection;
mod handle;
mod headers;
mod server;

pub use handle::ServerHandle;
pub use headers::HeaderProvider;
pub use server::{ServerConfig, WebsocketServerTransport};

/// Default maximum message/frame size in bytes (16 MB).
pub const WS_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors produced when configuring or starting the server transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A required configuration value is missing or malformed. Raised
    /// synchronously, before any network activity.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The listening address could not be bound (in use, permission
    /// denied, unresolved host). The server is left in a non-listening
    /// state; no handle is produced.
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),
}
