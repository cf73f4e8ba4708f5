//! Relay broker — room-code discovery and frame forwarding for peers that
//! cannot reach each other directly.
//!
//! ARCHITECTURE
//! ============
//! A host opens `/relay/listen/{code}` and becomes the listener for that code.
//! Peers open `/relay/connect/{code}`; each is assigned a `peer-N` id and the
//! host is told with `relay:open`. Frames from a peer reach the host tagged
//! with `peer`; frames from the host must carry `peer` and are routed to that
//! peer with the tag stripped. When a peer leaves the host gets `relay:close`;
//! when the host leaves every peer socket is closed.
//!
//! The relay never looks inside payloads and never answers requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::frame::{self, Frame};

// =============================================================================
// CONTROL EVENTS
// =============================================================================

/// Registration accepted. Payload: `{roomCode}`.
pub const RELAY_READY: &str = "relay:ready";
/// Registration refused. Payload: `{code, message}`.
pub const RELAY_ERROR: &str = "relay:error";
/// To the host: a peer joined. Payload: `{peer}`.
pub const RELAY_OPEN: &str = "relay:open";
/// To the host: a peer left. Payload: `{peer}`.
pub const RELAY_CLOSE: &str = "relay:close";

// =============================================================================
// STATE
// =============================================================================

struct Listener {
    session: Uuid,
    host: mpsc::Sender<Frame>,
    peers: HashMap<String, mpsc::Sender<Frame>>,
}

#[derive(Clone)]
pub struct RelayState {
    listeners: Arc<Mutex<HashMap<String, Listener>>>,
    next_peer: Arc<AtomicU64>,
    capacity: usize,
}

impl RelayState {
    #[must_use]
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_peer: Arc::new(AtomicU64::new(1)),
            capacity: config.channel_capacity,
        }
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<String, Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of registered room codes.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.listeners().len()
    }
}

// =============================================================================
// ROUTER
// =============================================================================

pub fn app(state: RelayState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/relay/listen/{code}", get(handle_listen))
        .route("/relay/connect/{code}", get(handle_connect))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Room codes are short uppercase alphanumerics.
fn valid_code(code: &str) -> bool {
    (1..=16).contains(&code.len()) && code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

async fn handle_listen(Path(code): Path<String>, State(state): State<RelayState>, ws: WebSocketUpgrade) -> Response {
    if !valid_code(&code) {
        return (StatusCode::BAD_REQUEST, "invalid room code").into_response();
    }
    ws.on_upgrade(move |socket| run_host(socket, state, code))
}

async fn handle_connect(Path(code): Path<String>, State(state): State<RelayState>, ws: WebSocketUpgrade) -> Response {
    if !valid_code(&code) {
        return (StatusCode::BAD_REQUEST, "invalid room code").into_response();
    }
    ws.on_upgrade(move |socket| run_peer(socket, state, code))
}

// =============================================================================
// HOST SOCKET
// =============================================================================

async fn run_host(mut socket: WebSocket, state: RelayState, code: String) {
    let (tx, mut rx) = mpsc::channel::<Frame>(state.capacity);
    let session = Uuid::new_v4();

    let registered = {
        let mut listeners = state.listeners();
        let taken = listeners.get(&code).is_some_and(|l| !l.host.is_closed());
        if !taken {
            listeners.insert(code.clone(), Listener { session, host: tx, peers: HashMap::new() });
        }
        !taken
    };

    if !registered {
        warn!(%code, "relay: room code already registered");
        let refusal = Frame::event(
            RELAY_ERROR,
            json!({"code": "E_ADDRESS_IN_USE", "message": format!("room {code} is already hosted")}),
        );
        let _ = send_frame(&mut socket, &refusal).await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    info!(%code, "relay: host registered");
    if send_frame(&mut socket, &Frame::event(RELAY_READY, json!({"roomCode": code}))).await.is_err() {
        unregister(&state, &code, session);
        return;
    }

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Binary(bytes) => route_to_peer(&state, &code, &bytes),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    unregister(&state, &code, session);
    info!(%code, "relay: host left");
}

/// Forward one host frame to the peer named in its routing tag.
fn route_to_peer(state: &RelayState, code: &str, bytes: &[u8]) {
    let mut frame = match frame::decode(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(%code, error = %e, "relay: undecodable host frame");
            return;
        }
    };
    let Some(peer) = frame.peer.take() else {
        debug!(%code, event = frame.event_name(), "relay: host frame without peer tag");
        return;
    };

    let listeners = state.listeners();
    let Some(target) = listeners.get(code).and_then(|l| l.peers.get(&peer)) else {
        debug!(%code, %peer, "relay: frame for departed peer");
        return;
    };
    if let Err(e) = target.try_send(frame) {
        warn!(%code, %peer, error = %e, "relay: peer channel full, dropping frame");
    }
}

/// Drop the listener if it is still ours. Peer channels close with it.
fn unregister(state: &RelayState, code: &str, session: Uuid) {
    let mut listeners = state.listeners();
    if listeners.get(code).is_some_and(|l| l.session == session) {
        listeners.remove(code);
    }
}

// =============================================================================
// PEER SOCKET
// =============================================================================

async fn run_peer(mut socket: WebSocket, state: RelayState, code: String) {
    let peer = format!("peer-{}", state.next_peer.fetch_add(1, Ordering::Relaxed));
    let (tx, mut rx) = mpsc::channel::<Frame>(state.capacity);

    let attached = {
        let mut listeners = state.listeners();
        listeners.get_mut(&code).map(|l| {
            l.peers.insert(peer.clone(), tx);
            (l.session, l.host.clone())
        })
    };
    let Some((session, host)) = attached else {
        info!(%code, %peer, "relay: connect to unknown room");
        let refusal = Frame::event(
            RELAY_ERROR,
            json!({"code": "E_PEER_UNAVAILABLE", "message": format!("room {code} not found")}),
        );
        let _ = send_frame(&mut socket, &refusal).await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    if host.send(Frame::event(RELAY_OPEN, json!({"peer": peer}))).await.is_err()
        || send_frame(&mut socket, &Frame::event(RELAY_READY, json!({"roomCode": code}))).await.is_err()
    {
        detach(&state, &code, session, &peer).await;
        return;
    }
    info!(%code, %peer, "relay: peer attached");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Binary(bytes) => match frame::decode(&bytes) {
                        Ok(frame) => {
                            if host.send(frame.with_peer(peer.clone())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(%code, %peer, error = %e, "relay: undecodable peer frame"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            frame = rx.recv() => {
                // Channel closes when the host leaves.
                let Some(frame) = frame else { break };
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    detach(&state, &code, session, &peer).await;
    info!(%code, %peer, "relay: peer detached");
}

/// Remove a peer from its listener and tell the host.
async fn detach(state: &RelayState, code: &str, session: Uuid, peer: &str) {
    let host = {
        let mut listeners = state.listeners();
        match listeners.get_mut(code) {
            Some(l) if l.session == session => {
                l.peers.remove(peer);
                Some(l.host.clone())
            }
            _ => None,
        }
    };
    if let Some(host) = host {
        let _ = host.send(Frame::event(RELAY_CLOSE, json!({"peer": peer}))).await;
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    socket.send(Message::Binary(frame::encode(frame).into())).await
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
