//! Handle for a live, closeable listening server.

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;

/// Handle to a bound, listening server.
///
/// Produced only by a successful
/// [`start`](crate::WebsocketServerTransport::start). Once disposed the
/// port is released and rebinding requires a new transport; there is no
/// way back to the listening state.
pub struct ServerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    done: CancellationToken,
}

impl ServerHandle {
    pub(crate) fn new(
        local_addr: SocketAddr,
        cancel: CancellationToken,
        done: CancellationToken,
    ) -> Self {
        Self {
            local_addr,
            cancel,
            done,
        }
    }

    /// The resolved local address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting new connections and releases the bound port.
    ///
    /// Accepted connections are closed as well: their cancellation tokens
    /// are children of this handle's. Idempotent; calling it on an already
    /// disposed handle is a no-op.
    pub fn dispose(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the server has fully shut down and the port is free.
    pub async fn closed(&self) {
        self.done.cancelled().await;
    }

    /// Returns `true` once [`dispose`](ServerHandle::dispose) has been
    /// called or the accept loop has failed.
    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
