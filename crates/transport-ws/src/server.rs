//! WebSocket server transport.
//!
//! Binds a TCP listener, upgrades `GET` requests on the configured path to
//! WebSocket, and hands each upgraded connection to the registered
//! [`ConnectionAcceptor`].

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use framelink_transport_core::ConnectionAcceptor;

use crate::handle::ServerHandle;
use crate::headers::{HeaderProvider, HeaderSlot};
use crate::{TransportError, WS_MAX_FRAME_SIZE, connection};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind; `None` means all interfaces.
    pub bind_address: Option<String>,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// URL path on which the upgrade is accepted; other paths get a 404.
    pub path: String,
    /// Maximum accepted WebSocket message/frame size.
    pub max_frame_size: usize,
    /// Period between server-initiated keepalive pings; `None` disables them.
    pub keepalive_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            port: 0,
            path: "/".to_string(),
            max_frame_size: WS_MAX_FRAME_SIZE,
            keepalive_interval: None,
        }
    }
}

/// WebSocket server transport for the Framelink RPC protocol.
///
/// Construct via one of the `create*` constructors, optionally register a
/// transport-header provider and a pong observer, then [`start`] with the
/// protocol layer's acceptor.
///
/// [`start`]: WebsocketServerTransport::start
pub struct WebsocketServerTransport {
    config: ServerConfig,
    headers: Arc<HeaderSlot>,
    pong_observer: Option<mpsc::Sender<Bytes>>,
}

impl WebsocketServerTransport {
    /// Canonical constructor; all `create*` variants funnel into this.
    fn new(config: ServerConfig) -> Self {
        Self {
            config,
            headers: Arc::new(HeaderSlot::empty()),
            pong_observer: None,
        }
    }

    /// Creates a transport listening on all interfaces.
    pub fn create(port: u16) -> Self {
        Self::new(ServerConfig {
            port,
            ..ServerConfig::default()
        })
    }

    /// Creates a transport bound to the given host and port.
    ///
    /// Fails with [`TransportError::InvalidArgument`] if `bind_address` is
    /// empty.
    pub fn create_with_address(
        bind_address: impl Into<String>,
        port: u16,
    ) -> Result<Self, TransportError> {
        Self::create_with_config(ServerConfig {
            bind_address: Some(bind_address.into()),
            port,
            ..ServerConfig::default()
        })
    }

    /// Creates a transport bound to a resolved socket address.
    pub fn create_with_socket_addr(addr: SocketAddr) -> Self {
        Self::new(ServerConfig {
            bind_address: Some(addr.ip().to_string()),
            port: addr.port(),
            ..ServerConfig::default()
        })
    }

    /// Creates a transport from a full configuration.
    ///
    /// Fails with [`TransportError::InvalidArgument`] if the configuration
    /// is malformed, before any network activity.
    pub fn create_with_config(config: ServerConfig) -> Result<Self, TransportError> {
        if let Some(host) = &config.bind_address {
            if host.is_empty() {
                return Err(TransportError::InvalidArgument(
                    "bind address must not be empty".into(),
                ));
            }
        }
        if !config.path.starts_with('/') {
            return Err(TransportError::InvalidArgument(format!(
                "upgrade path must start with '/': {:?}",
                config.path
            )));
        }
        if config.max_frame_size == 0 {
            return Err(TransportError::InvalidArgument(
                "max frame size must be non-zero".into(),
            ));
        }

        Ok(Self::new(config))
    }

    /// Replaces the transport-header provider.
    ///
    /// The provider is evaluated once per accepted connection, at upgrade
    /// time, and its headers are attached to the upgrade response before
    /// the handshake completes. Replacing it after [`start`] affects
    /// subsequent connections only.
    ///
    /// [`start`]: WebsocketServerTransport::start
    pub fn set_transport_headers(&self, provider: HeaderProvider) {
        self.headers.replace(provider);
    }

    /// Registers the observer that receives inbound pong payloads.
    ///
    /// Pongs are forwarded with `try_send`; a slow observer drops payloads
    /// rather than stalling the connection. Used for liveness checks and
    /// tests; unset means pongs are consumed silently.
    pub fn set_pong_observer(&mut self, observer: mpsc::Sender<Bytes>) {
        self.pong_observer = Some(observer);
    }

    /// Binds the configured address and starts accepting connections.
    ///
    /// Resolves to a [`ServerHandle`] once the bind succeeds, or to
    /// [`TransportError::Bind`] if it does not; a bind failure never
    /// affects other transports or crashes the process. Each accepted
    /// connection is upgraded and handed to `acceptor` exactly once, on
    /// its own task; per-connection faults stay on that connection.
    pub async fn start<A: ConnectionAcceptor>(
        &self,
        acceptor: A,
    ) -> Result<ServerHandle, TransportError> {
        let listener = match &self.config.bind_address {
            Some(host) => TcpListener::bind((host.as_str(), self.config.port)).await,
            None => TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.config.port)).await,
        }
        .map_err(TransportError::Bind)?;

        let local_addr = listener.local_addr().map_err(TransportError::Bind)?;
        info!(%local_addr, "websocket server listening");

        let cancel = CancellationToken::new();
        let done = CancellationToken::new();

        tokio::spawn(accept_loop(
            listener,
            self.config.clone(),
            self.headers.clone(),
            self.pong_observer.clone(),
            Arc::new(acceptor),
            cancel.clone(),
            done.clone(),
        ));

        Ok(ServerHandle::new(local_addr, cancel, done))
    }
}

/// Accepts connections until the handle is disposed.
async fn accept_loop<A: ConnectionAcceptor>(
    listener: TcpListener,
    config: ServerConfig,
    headers: Arc<HeaderSlot>,
    pong_observer: Option<mpsc::Sender<Bytes>>,
    acceptor: Arc<A>,
    cancel: CancellationToken,
    done: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("server shutting down");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        let config = config.clone();
                        let headers = headers.clone();
                        let pong_observer = pong_observer.clone();
                        let acceptor = acceptor.clone();
                        let conn_cancel = cancel.clone();
                        tokio::spawn(async move {
                            let result = handle_connection(
                                stream,
                                peer_addr,
                                &config,
                                headers,
                                pong_observer,
                                acceptor,
                                conn_cancel,
                            )
                            .await;
                            if let Err(e) = result {
                                warn!(%peer_addr, "connection error: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        error!("accept error: {e}");
                    }
                }
            }
        }
    }

    // Release the bound port, then signal full shutdown.
    drop(listener);
    done.cancel();
}

/// Handles one TCP connection: upgrade, adapt, hand off to the acceptor.
async fn handle_connection<A: ConnectionAcceptor>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: &ServerConfig,
    headers: Arc<HeaderSlot>,
    pong_observer: Option<mpsc::Sender<Bytes>>,
    acceptor: Arc<A>,
    cancel: CancellationToken,
) -> Result<(), tungstenite::Error> {
    // Evaluate the provider now, once per connection.
    let header_map = headers.get()();
    let path = config.path.clone();

    let callback = move |request: &Request, mut response: Response| {
        if request.uri().path() != path {
            debug!(path = %request.uri().path(), "rejecting upgrade on unknown path");
            let mut reject = ErrorResponse::new(Some("not found".into()));
            *reject.status_mut() = StatusCode::NOT_FOUND;
            return Err(reject);
        }

        // The response must carry the provider's headers verbatim, so an
        // unparseable header fails the upgrade rather than being dropped.
        for (name, value) in &header_map {
            match (name.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
                (Ok(parsed_name), Ok(parsed_value)) => {
                    response.headers_mut().append(parsed_name, parsed_value);
                }
                _ => {
                    warn!(header = %name, "rejecting upgrade: invalid transport header");
                    let mut reject = ErrorResponse::new(Some("invalid transport header".into()));
                    *reject.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                    return Err(reject);
                }
            }
        }

        Ok(response)
    };

    let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_frame_size);
    ws_config.max_frame_size = Some(config.max_frame_size);

    let ws = accept_hdr_async_with_config(stream, callback, Some(ws_config)).await?;
    info!(%peer_addr, "WebSocket connection established");

    let frames = connection::spawn_connection(
        ws,
        peer_addr,
        pong_observer,
        config.keepalive_interval,
        &cancel,
    );

    acceptor.accept(frames).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use framelink_transport_core::FrameStream;
    use futures_util::SinkExt;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;

    fn collecting_acceptor(
        tx: mpsc::Sender<Bytes>,
    ) -> impl Fn(FrameStream) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
    + Send
    + Sync
    + 'static {
        move |mut stream: FrameStream| {
            let tx = tx.clone();
            Box::pin(async move {
                while let Some(Ok(frame)) = stream.recv().await {
                    let _ = tx.send(frame).await;
                }
            })
        }
    }

    #[test]
    fn create_rejects_empty_bind_address() {
        let result = WebsocketServerTransport::create_with_address("", 0);
        assert!(matches!(result, Err(TransportError::InvalidArgument(_))));
    }

    #[test]
    fn create_rejects_bad_path() {
        let config = ServerConfig {
            path: "ws".to_string(),
            ..ServerConfig::default()
        };
        let result = WebsocketServerTransport::create_with_config(config);
        assert!(matches!(result, Err(TransportError::InvalidArgument(_))));
    }

    #[test]
    fn create_rejects_zero_frame_size() {
        let config = ServerConfig {
            max_frame_size: 0,
            ..ServerConfig::default()
        };
        let result = WebsocketServerTransport::create_with_config(config);
        assert!(matches!(result, Err(TransportError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn start_binds_requested_address() {
        let transport = WebsocketServerTransport::create_with_address("127.0.0.1", 0).unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let handle = transport.start(collecting_acceptor(tx)).await.unwrap();

        let addr = handle.local_addr();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert!(addr.port() > 0, "should have bound a dynamic port");

        handle.dispose();
        handle.closed().await;
    }

    #[tokio::test]
    async fn frames_arrive_in_order_without_control_frames() {
        let transport = WebsocketServerTransport::create_with_address("127.0.0.1", 0).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = transport.start(collecting_acceptor(tx)).await.unwrap();

        let url = format!("ws://{}/", handle.local_addr());
        let (mut ws, _) = connect_async(&url).await.unwrap();

        ws.send(Message::Binary(Bytes::from_static(b"1"))).await.unwrap();
        ws.send(Message::Ping(Bytes::from_static(b"p"))).await.unwrap();
        ws.send(Message::Binary(Bytes::from_static(b"2"))).await.unwrap();
        ws.send(Message::Pong(Bytes::from_static(b"u"))).await.unwrap();
        ws.send(Message::Binary(Bytes::from_static(b"3"))).await.unwrap();

        for expected in [&b"1"[..], &b"2"[..], &b"3"[..]] {
            let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("frame within deadline")
                .expect("stream open");
            assert_eq!(frame, expected);
        }
        assert!(rx.try_recv().is_err(), "no extra frames surfaced");

        drop(ws);
        handle.dispose();
        handle.closed().await;
    }

    #[tokio::test]
    async fn transport_headers_are_applied_per_connection() {
        let transport = WebsocketServerTransport::create_with_address("127.0.0.1", 0).unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let provider_counter = counter.clone();
        transport.set_transport_headers(Arc::new(move || {
            let n = provider_counter.fetch_add(1, Ordering::SeqCst) + 1;
            HashMap::from([
                ("x-framelink-node".to_string(), "node-7".to_string()),
                ("x-framelink-conn".to_string(), n.to_string()),
            ])
        }));

        let (tx, _rx) = mpsc::channel(8);
        let handle = transport.start(collecting_acceptor(tx)).await.unwrap();
        let url = format!("ws://{}/", handle.local_addr());

        let (_ws1, response1) = connect_async(&url).await.unwrap();
        assert_eq!(
            response1.headers().get("x-framelink-node").unwrap(),
            "node-7"
        );
        assert_eq!(response1.headers().get("x-framelink-conn").unwrap(), "1");

        // A new evaluation occurs for the next connection.
        let (_ws2, response2) = connect_async(&url).await.unwrap();
        assert_eq!(response2.headers().get("x-framelink-conn").unwrap(), "2");

        handle.dispose();
        handle.closed().await;
    }

    #[tokio::test]
    async fn header_provider_can_be_replaced_after_start() {
        let transport = WebsocketServerTransport::create_with_address("127.0.0.1", 0).unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let handle = transport.start(collecting_acceptor(tx)).await.unwrap();
        let url = format!("ws://{}/", handle.local_addr());

        let (_ws1, response1) = connect_async(&url).await.unwrap();
        assert!(response1.headers().get("x-framelink-node").is_none());

        transport.set_transport_headers(Arc::new(|| {
            HashMap::from([("x-framelink-node".to_string(), "node-9".to_string())])
        }));

        let (_ws2, response2) = connect_async(&url).await.unwrap();
        assert_eq!(
            response2.headers().get("x-framelink-node").unwrap(),
            "node-9"
        );

        handle.dispose();
        handle.closed().await;
    }

    #[tokio::test]
    async fn invalid_transport_header_fails_the_upgrade() {
        let transport = WebsocketServerTransport::create_with_address("127.0.0.1", 0).unwrap();
        transport.set_transport_headers(Arc::new(|| {
            HashMap::from([("bad header".to_string(), "x".to_string())])
        }));

        let (tx, _rx) = mpsc::channel(8);
        let handle = transport.start(collecting_acceptor(tx)).await.unwrap();
        let url = format!("ws://{}/", handle.local_addr());

        assert!(connect_async(&url).await.is_err(), "upgrade rejected");

        // A valid provider restores service on the same listener.
        transport.set_transport_headers(Arc::new(|| {
            HashMap::from([("x-framelink-node".to_string(), "node-3".to_string())])
        }));
        let (_ws, response) = connect_async(&url).await.unwrap();
        assert_eq!(response.headers().get("x-framelink-node").unwrap(), "node-3");

        handle.dispose();
        handle.closed().await;
    }

    #[tokio::test]
    async fn headers_default_to_empty() {
        let transport = WebsocketServerTransport::create_with_address("127.0.0.1", 0).unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let handle = transport.start(collecting_acceptor(tx)).await.unwrap();

        let url = format!("ws://{}/", handle.local_addr());
        let (_ws, response) = connect_async(&url).await.unwrap();
        assert!(response.headers().get("x-framelink-node").is_none());

        handle.dispose();
        handle.closed().await;
    }

    #[tokio::test]
    async fn upgrade_on_unknown_path_is_rejected() {
        let transport = WebsocketServerTransport::create_with_address("127.0.0.1", 0).unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let handle = transport.start(collecting_acceptor(tx)).await.unwrap();

        let url = format!("ws://{}/other", handle.local_addr());
        assert!(connect_async(&url).await.is_err());

        // The listener is still healthy.
        let url = format!("ws://{}/", handle.local_addr());
        assert!(connect_async(&url).await.is_ok());

        handle.dispose();
        handle.closed().await;
    }

    #[tokio::test]
    async fn configured_path_accepts_upgrade() {
        let config = ServerConfig {
            bind_address: Some("127.0.0.1".to_string()),
            path: "/rpc".to_string(),
            ..ServerConfig::default()
        };
        let transport = WebsocketServerTransport::create_with_config(config).unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let handle = transport.start(collecting_acceptor(tx)).await.unwrap();

        let url = format!("ws://{}/rpc", handle.local_addr());
        assert!(connect_async(&url).await.is_ok());

        handle.dispose();
        handle.closed().await;
    }
}
