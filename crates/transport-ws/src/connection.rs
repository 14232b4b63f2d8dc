//! Connection adapter: read/write pumps with ping/pong interception.
//!
//! Wraps one upgraded WebSocket connection into the [`FrameStream`]
//! contract. Application frames pass through in order; ping and pong
//! control frames are consumed here and never surface to the acceptor.
//! The engine answers each inbound ping itself, holding exactly one
//! pending pong (with the ping's payload) that it flushes once the socket
//! is writable again; this adapter only keeps those frames out of the
//! application stream and reports pong payloads to the observer.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use framelink_transport_core::{ConnectionError, FRAME_BUFFER_SIZE, FrameSender, FrameStream};

/// Spawns the read and write pumps for one upgraded connection and returns
/// the application-facing frame stream.
///
/// The pumps run as background tasks under a child of `server_cancel`, so
/// disposing the server closes the connection. The read pump stopping (peer
/// close, fault, or acceptor dropping the stream) cancels the write pump,
/// which sends a best-effort close frame on the way out.
pub(crate) fn spawn_connection<S>(
    ws: S,
    peer_addr: SocketAddr,
    pong_observer: Option<mpsc::Sender<Bytes>>,
    keepalive: Option<Duration>,
    server_cancel: &CancellationToken,
) -> FrameStream
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>>
        + Sink<WsMessage, Error = tungstenite::Error>
        + Send
        + Unpin
        + 'static,
{
    let (in_tx, in_rx) = mpsc::channel(FRAME_BUFFER_SIZE);
    let (out_tx, out_rx) = mpsc::channel::<Bytes>(FRAME_BUFFER_SIZE);
    let cancel = server_cancel.child_token();

    let (ws_sink, ws_stream) = ws.split();

    tokio::spawn(write_pump(ws_sink, out_rx, keepalive, cancel.clone()));

    tokio::spawn(async move {
        read_pump(ws_stream, in_tx, pong_observer, cancel.clone()).await;
        // Reader is done; stop the writer so it closes the connection.
        cancel.cancel();
        debug!(%peer_addr, "connection pumps stopped");
    });

    FrameStream::new(peer_addr, in_rx, FrameSender::new(out_tx))
}

/// Read pump: forwards application frames in order, filters control frames.
async fn read_pump<S>(
    mut stream: S,
    in_tx: mpsc::Sender<Result<Bytes, ConnectionError>>,
    pong_observer: Option<mpsc::Sender<Bytes>>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = stream.next() => {
                match frame {
                    Some(Ok(msg)) => match msg {
                        WsMessage::Binary(data) => {
                            // send() applies backpressure: a slow acceptor
                            // stalls reading rather than queueing unbounded.
                            if in_tx.send(Ok(data)).await.is_err() {
                                break; // Acceptor dropped the stream.
                            }
                        }
                        WsMessage::Text(text) => {
                            if in_tx.send(Ok(Bytes::from(text))).await.is_err() {
                                break;
                            }
                        }
                        WsMessage::Ping(payload) => {
                            // The engine has already queued the matching
                            // pong; just keep the frame below the adapter.
                            trace!(len = payload.len(), "received ping");
                        }
                        WsMessage::Pong(payload) => {
                            trace!(len = payload.len(), "received pong");
                            if let Some(observer) = &pong_observer {
                                let _ = observer.try_send(payload);
                            }
                        }
                        WsMessage::Close(_) => {
                            debug!("received close frame");
                            break;
                        }
                        WsMessage::Frame(_) => {} // Raw frames ignored.
                    },
                    Some(Err(e)) => {
                        warn!("read pump error: {e}");
                        if let Some(fault) = connection_fault(&e) {
                            let _ = in_tx.send(Err(fault)).await;
                        }
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }
}

/// Write pump: drains outbound application frames into the sink.
///
/// With `keepalive` set, also sends periodic empty pings. Ends with a
/// best-effort close frame.
async fn write_pump<S>(
    mut sink: S,
    mut out_rx: mpsc::Receiver<Bytes>,
    keepalive: Option<Duration>,
    cancel: CancellationToken,
) where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let mut ping_interval = keepalive.map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the immediate first tick.
        interval.reset();
        interval
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = out_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = sink.send(WsMessage::Binary(frame)).await {
                            error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break, // All senders dropped.
                }
            }

            _ = next_tick(&mut ping_interval) => {
                if let Err(e) = sink.send(WsMessage::Ping(Bytes::new())).await {
                    error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.send(WsMessage::Close(None)).await;
}

/// Resolves on the next keepalive tick, or never when keepalive is off.
async fn next_tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Maps an engine error to the fault surfaced on the frame stream.
///
/// `None` for the variants that mean a clean close rather than a fault.
fn connection_fault(e: &tungstenite::Error) -> Option<ConnectionError> {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => None,
        tungstenite::Error::Protocol(p) => Some(ConnectionError::Protocol(p.to_string())),
        tungstenite::Error::Capacity(c) => Some(ConnectionError::Protocol(c.to_string())),
        other => Some(ConnectionError::Transport(other.to_string())),
    }
}
