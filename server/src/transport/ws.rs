//! Websocket signaling through the relay broker.
//!
//! The host holds one socket on `/relay/listen/{code}` and the relay
//! multiplexes every joined peer over it, tagging frames with `peer`. This
//! module splits that socket back into one [`Connection`] per peer, so the
//! bridge sees the same shape as with any other provider. A joining peer holds
//! one socket on `/relay/connect/{code}` and frames pass through untouched.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use super::{Connection, Signaling, TransportError};
use crate::frame::{self, Frame};
use crate::relay::{RELAY_CLOSE, RELAY_ERROR, RELAY_OPEN, RELAY_READY};

const DEFAULT_CAPACITY: usize = 256;

pub struct WsSignaling {
    base_url: String,
    capacity: usize,
}

impl WsSignaling {
    /// `base_url` is the relay origin, e.g. `ws://127.0.0.1:3000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), capacity: DEFAULT_CAPACITY }
    }

    fn url(&self, role: &str, code: &str) -> String {
        format!("{}/relay/{role}/{code}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Signaling for WsSignaling {
    async fn listen(&self, address: &str) -> Result<mpsc::Receiver<Connection>, TransportError> {
        let stream = open(&self.url("listen", address)).await?;
        info!(%address, "ws: listening via relay");
        let (accept_tx, accept_rx) = mpsc::channel(self.capacity);
        tokio::spawn(run_listener(stream, accept_tx, self.capacity, address.to_owned()));
        Ok(accept_rx)
    }

    async fn connect(&self, address: &str) -> Result<Connection, TransportError> {
        let stream = open(&self.url("connect", address)).await?;
        info!(%address, "ws: connected via relay");
        let (sink, source) = stream.split();
        let (out_tx, out_rx) = mpsc::channel(self.capacity);
        let (in_tx, in_rx) = mpsc::channel(self.capacity);
        tokio::spawn(write_frames(sink, out_rx));
        tokio::spawn(read_frames(source, in_tx));
        Ok(Connection { remote: address.to_owned(), outbound: out_tx, inbound: in_rx })
    }
}

// =============================================================================
// HANDSHAKE
// =============================================================================

async fn open(
    url: &str,
) -> Result<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    TransportError,
> {
    let (mut stream, _) = connect_async(url).await?;
    let Some(first) = next_frame(&mut stream).await? else {
        return Err(TransportError::Closed);
    };
    match first.event_name() {
        RELAY_READY => Ok(stream),
        RELAY_ERROR => Err(relay_error(&first.payload)),
        other => Err(TransportError::Protocol(format!("expected {RELAY_READY}, got `{other}`"))),
    }
}

fn relay_error(payload: &Value) -> TransportError {
    let message = payload.get("message").and_then(Value::as_str).unwrap_or("relay refused").to_owned();
    match payload.get("code").and_then(Value::as_str) {
        Some("E_ADDRESS_IN_USE") => TransportError::AddressInUse(message),
        Some("E_PEER_UNAVAILABLE") => TransportError::Unavailable(message),
        _ => TransportError::Protocol(message),
    }
}

// =============================================================================
// FRAME PUMPS
// =============================================================================

/// Next binary frame from the socket. `None` on close.
async fn next_frame<S>(stream: &mut S) -> Result<Option<Frame>, TransportError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        match message? {
            Message::Binary(bytes) => {
                return frame::decode(&bytes)
                    .map(Some)
                    .map_err(|e| TransportError::Protocol(e.to_string()));
            }
            Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}

async fn write_frames<K>(mut sink: K, mut rx: mpsc::Receiver<Frame>)
where
    K: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.send(Message::Binary(frame::encode(&frame).into())).await {
            debug!(error = %e, "ws: send failed");
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_frames<S>(mut source: S, tx: mpsc::Sender<Frame>)
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let next = tokio::select! {
            () = tx.closed() => break,
            next = next_frame(&mut source) => next,
        };
        match next {
            Ok(Some(frame)) => {
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "ws: read failed");
                break;
            }
        }
    }
}

/// Demultiplex the host socket into per-peer connections.
async fn run_listener(
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    accept: mpsc::Sender<Connection>,
    capacity: usize,
    address: String,
) {
    let (sink, mut source) = stream.split();
    let (out_tx, out_rx) = mpsc::channel::<Frame>(capacity);
    let writer = tokio::spawn(write_frames(sink, out_rx));
    let mut peers: HashMap<String, mpsc::Sender<Frame>> = HashMap::new();

    loop {
        let next = tokio::select! {
            () = accept.closed() => break,
            next = next_frame(&mut source) => next,
        };
        let mut frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!(%address, error = %e, "ws: relay read failed");
                break;
            }
        };

        let event = frame.event_name().to_owned();
        match event.as_str() {
            RELAY_OPEN if frame.peer.is_none() => {
                let Some(peer) = frame.payload.get("peer").and_then(Value::as_str) else {
                    warn!(%address, "ws: relay:open without peer");
                    continue;
                };
                let (in_tx, in_rx) = mpsc::channel(capacity);
                let (peer_out_tx, peer_out_rx) = mpsc::channel(capacity);
                peers.insert(peer.to_owned(), in_tx);
                tokio::spawn(tag_outbound(peer.to_owned(), peer_out_rx, out_tx.clone()));
                let conn = Connection { remote: peer.to_owned(), outbound: peer_out_tx, inbound: in_rx };
                if accept.send(conn).await.is_err() {
                    break;
                }
            }
            RELAY_CLOSE if frame.peer.is_none() => {
                if let Some(peer) = frame.payload.get("peer").and_then(Value::as_str) {
                    peers.remove(peer);
                }
            }
            _ => {
                let Some(peer) = frame.peer.take() else {
                    warn!(%address, %event, "ws: untagged frame from relay");
                    continue;
                };
                let delivered = match peers.get(&peer) {
                    Some(tx) => tx.send(frame).await.is_ok(),
                    None => true,
                };
                if !delivered {
                    peers.remove(&peer);
                }
            }
        }
    }

    drop(peers);
    writer.abort();
    info!(%address, "ws: listener closed");
}

/// Stamp the routing key on frames headed for one peer.
async fn tag_outbound(peer: String, mut rx: mpsc::Receiver<Frame>, out: mpsc::Sender<Frame>) {
    while let Some(frame) = rx.recv().await {
        if out.send(frame.with_peer(peer.clone())).await.is_err() {
            break;
        }
    }
}
