//! Acceptor trait for taking ownership of accepted connections.

use std::future::Future;
use std::pin::Pin;

use crate::stream::FrameStream;

/// A boxed future returned by [`ConnectionAcceptor::accept`].
pub type AcceptorFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Protocol-layer callback that takes ownership of one accepted connection.
///
/// The transport invokes `accept` exactly once per connection, on its own
/// task, with the connection's [`FrameStream`]. The acceptor drives the RPC
/// session until the stream ends; dropping the stream closes the
/// connection.
pub trait ConnectionAcceptor: Send + Sync + 'static {
    fn accept(&self, stream: FrameStream) -> AcceptorFuture<'_>;
}

/// Async closures accept connections directly: `|stream| async move { .. }`.
impl<F, Fut> ConnectionAcceptor for F
where
    F: Fn(FrameStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn accept(&self, stream: FrameStream) -> AcceptorFuture<'_> {
        Box::pin(self(stream))
    }
}
