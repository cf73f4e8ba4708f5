//! Socket bridge — one emit/on surface over a host-authoritative peer mesh.
//!
//! ARCHITECTURE
//! ============
//! Application code sees a single object with `on`, `emit` and `broadcast`.
//! Behind it the bridge plays one of two roles:
//!
//! - **Host** (`createRoom`): listens on the room code, owns the room's
//!   [`Dispatcher`], and answers every action, its own included. Inbound peer
//!   requests are dispatched exactly like local emits, with the connection's
//!   remote address as the player identity.
//! - **Peer** (`joinRoom`): holds one upstream connection. Emits become
//!   request frames; the continuation waits in a bounded pending table until
//!   the correlated reply arrives, the call times out, or the link closes.
//!
//! LIFECYCLE
//! =========
//! 1. `Unconnected` → `createRoom` / `joinRoom` → `Connecting`
//! 2. `Connecting` → `Host` or `Peer` on success, back to `Unconnected` on
//!    transport failure (raises `transportError`)
//! 3. Upstream close on a peer → pending calls fail with `Disconnected`,
//!    `disconnected` is raised, state returns to `Unconnected`
//! 4. `disconnect()` from any state → tasks aborted, `Unconnected`
//!
//! CONCURRENCY
//! ===========
//! The room sits behind one `tokio::sync::Mutex`; broadcasts from an action
//! are delivered while that lock is held, so every observer sees them in state
//! order and before the caller's reply. A per-room turn driver wakes on
//! [`Notify`] after each action and steps scripted players until a human holds
//! the turn.

pub mod dispatch;
mod pending;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::HostConfig;
use crate::frame::{ErrorCode, Frame, Kind, success};
use crate::transport::{Connection, Signaling, TransportError};
use dispatch::{Broadcast, Dispatcher, DispatcherFactory};
use pending::PendingTable;

// =============================================================================
// EVENT NAMES
// =============================================================================

/// Intent: become host of a new room. Payload: `{roomCode?}`.
pub const CREATE_ROOM: &str = "createRoom";
/// Intent: join an existing room as a peer. Payload: `{roomCode}`.
pub const JOIN_ROOM: &str = "joinRoom";
/// Raised locally when the transport fails. Payload: `{message}`.
pub const TRANSPORT_ERROR: &str = "transportError";
/// Raised locally when the link to the host closes. Payload: `{roomCode}`.
pub const DISCONNECTED: &str = "disconnected";

const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge is already connected to a room")]
    AlreadyConnected,
    #[error("bridge is not connected to a room")]
    NotConnected,
    #[error("invalid room code: {0:?}")]
    InvalidRoomCode(String),
    #[error("no reply within the call timeout")]
    Timeout,
    #[error("connection to the host closed")]
    Disconnected,
    #[error("too many outstanding calls (limit {limit})")]
    TooManyPending { limit: usize },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ErrorCode for BridgeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyConnected => "E_ALREADY_CONNECTED",
            Self::NotConnected => "E_NOT_CONNECTED",
            Self::InvalidRoomCode(_) => "E_INVALID_ROOM_CODE",
            Self::Timeout => "E_TIMEOUT",
            Self::Disconnected => "E_DISCONNECTED",
            Self::TooManyPending { .. } => "E_TOO_MANY_PENDING",
            Self::Transport(e) => e.error_code(),
        }
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// Event callback. Runs on the task that produced the event; must not block.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct Registry {
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
}

impl Registry {
    fn add(&self, event: &str, handler: Handler) {
        lock(&self.handlers).entry(event.to_owned()).or_default().push(handler);
    }

    /// Invoke handlers in registration order. The lock is released first so
    /// handlers may register more handlers.
    fn invoke(&self, event: &str, payload: &Value) {
        let handlers = lock(&self.handlers).get(event).cloned().unwrap_or_default();
        for handler in handlers {
            handler(payload);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// SESSION
// =============================================================================

enum Session {
    Unconnected,
    Connecting,
    Host(Arc<HostSide>),
    Peer(Arc<PeerSide>),
}

impl Session {
    fn shutdown(self) {
        match self {
            Self::Host(host) => host.shutdown(),
            Self::Peer(peer) => peer.shutdown(),
            Self::Unconnected | Self::Connecting => {}
        }
    }
}

struct HostSide {
    code: String,
    room: tokio::sync::Mutex<Box<dyn Dispatcher>>,
    /// Remote address -> outbound frames.
    connections: Mutex<HashMap<String, mpsc::Sender<Frame>>>,
    wake: Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HostSide {
    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Run one action under the room lock and deliver its broadcasts.
    async fn dispatch(&self, registry: &Registry, sender: &str, event: &str, payload: Value) -> Value {
        let mut room = self.room.lock().await;
        let outcome = room.dispatch(sender, event, payload);
        self.deliver(registry, outcome.broadcasts);
        drop(room);
        self.wake.notify_one();
        outcome.result
    }

    async fn close_peer(&self, registry: &Registry, remote: &str) {
        lock(&self.connections).remove(remote);
        let mut room = self.room.lock().await;
        let outcome = room.peer_closed(remote);
        self.deliver(registry, outcome.broadcasts);
        drop(room);
        self.wake.notify_one();
    }

    /// Local handlers first, then every open connection. Callers hold the
    /// room lock when ordering matters.
    fn deliver(&self, registry: &Registry, broadcasts: Vec<Broadcast>) {
        for Broadcast { event, payload } in broadcasts {
            registry.invoke(&event, &payload);
            let frame = Frame::event(event, payload);
            for (remote, tx) in lock(&self.connections).iter() {
                if let Err(e) = tx.try_send(frame.clone()) {
                    warn!(room = %self.code, peer = %remote, error = %e, "bridge: broadcast dropped");
                }
            }
        }
    }

    fn shutdown(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        lock(&self.connections).clear();
        info!(room = %self.code, "bridge: host closed");
    }
}

struct PeerSide {
    code: String,
    outbound: mpsc::Sender<Frame>,
    pending: Mutex<PendingTable>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl PeerSide {
    async fn call(&self, event: &str, payload: Value, timeout: Duration) -> Result<Value, BridgeError> {
        let mut frame = Frame::call(event, payload);
        let id = *frame.correlation_id.get_or_insert_with(Uuid::new_v4);
        let rx = lock(&self.pending).insert(id, Instant::now() + timeout)?;

        if self.outbound.send(frame).await.is_err() {
            lock(&self.pending).remove(&id);
            return Err(BridgeError::Disconnected);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(BridgeError::Disconnected),
            Err(_) => {
                lock(&self.pending).remove(&id);
                warn!(room = %self.code, %event, "bridge: call timed out");
                Err(BridgeError::Timeout)
            }
        }
    }

    fn shutdown(&self) {
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
        let failed = lock(&self.pending).fail_all();
        info!(room = %self.code, failed, "bridge: left room");
    }
}

// =============================================================================
// BRIDGE
// =============================================================================

struct Inner {
    local_id: String,
    config: HostConfig,
    signaling: Arc<dyn Signaling>,
    factory: DispatcherFactory,
    registry: Arc<Registry>,
    session: Mutex<Session>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let session = self.session.get_mut().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(session, Session::Unconnected).shutdown();
    }
}

/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

enum Role {
    Host(Arc<HostSide>),
    Peer(Arc<PeerSide>),
}

impl Bridge {
    pub fn new(signaling: Arc<dyn Signaling>, factory: DispatcherFactory, config: HostConfig) -> Self {
        let local_id = format!("p_{}", &Uuid::new_v4().simple().to_string()[..10]);
        Self {
            inner: Arc::new(Inner {
                local_id,
                config,
                signaling,
                factory,
                registry: Arc::new(Registry::default()),
                session: Mutex::new(Session::Unconnected),
            }),
        }
    }

    /// This bridge's player identity when hosting.
    #[must_use]
    pub fn local_id(&self) -> &str {
        &self.inner.local_id
    }

    #[must_use]
    pub fn room_code(&self) -> Option<String> {
        match self.role()? {
            Role::Host(host) => Some(host.code.clone()),
            Role::Peer(peer) => Some(peer.code.clone()),
        }
    }

    #[must_use]
    pub fn is_host(&self) -> bool {
        matches!(self.role(), Some(Role::Host(_)))
    }

    /// Open connections to joined peers. Zero unless hosting.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        match self.role() {
            Some(Role::Host(host)) => lock(&host.connections).len(),
            _ => 0,
        }
    }

    /// Register a handler. Several handlers per event run in registration order.
    pub fn on(&self, event: &str, handler: impl Fn(&Value) + Send + Sync + 'static) {
        self.inner.registry.add(event, Arc::new(handler));
    }

    /// Send an event and wait for its result.
    ///
    /// `createRoom` and `joinRoom` run the connect sequence. Any other event
    /// goes to the room's state machine: directly when hosting, as a request
    /// frame when joined. Game-level rejections come back as `Ok` results with
    /// `success: false`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] when the bridge is in the wrong state, the
    /// transport fails, or no reply arrives in time.
    pub async fn emit(&self, event: &str, payload: Value) -> Result<Value, BridgeError> {
        match event {
            CREATE_ROOM => self.create_room(&payload).await,
            JOIN_ROOM => self.join_room(&payload).await,
            _ => match self.role() {
                Some(Role::Host(host)) => {
                    Ok(host.dispatch(&self.inner.registry, &self.inner.local_id, event, payload).await)
                }
                Some(Role::Peer(peer)) => {
                    let result = peer.call(event, payload, self.inner.config.call_timeout).await;
                    if let Err(BridgeError::Disconnected) = &result {
                        self.raise_transport_error(&BridgeError::Disconnected);
                    }
                    result
                }
                None => Err(BridgeError::NotConnected),
            },
        }
    }

    /// Send an event without waiting for a result.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] when not connected or the link is gone.
    pub async fn emit_event(&self, event: &str, payload: Value) -> Result<(), BridgeError> {
        match (event, self.role()) {
            (CREATE_ROOM | JOIN_ROOM, _) => self.emit(event, payload).await.map(|_| ()),
            (_, Some(Role::Host(host))) => {
                host.dispatch(&self.inner.registry, &self.inner.local_id, event, payload).await;
                Ok(())
            }
            (_, Some(Role::Peer(peer))) => {
                peer.outbound.send(Frame::event(event, payload)).await.map_err(|_| BridgeError::Disconnected)
            }
            (_, None) => Err(BridgeError::NotConnected),
        }
    }

    /// Invoke local handlers and, when hosting, push the event to every peer.
    pub fn broadcast(&self, event: &str, payload: Value) {
        match self.role() {
            Some(Role::Host(host)) => host.deliver(&self.inner.registry, vec![Broadcast::new(event, payload)]),
            _ => self.inner.registry.invoke(event, &payload),
        }
    }

    /// Leave the room. Pending calls fail with `Disconnected`.
    pub fn disconnect(&self) {
        let session = std::mem::replace(&mut *lock(&self.inner.session), Session::Unconnected);
        session.shutdown();
    }

    // =========================================================================
    // CONNECT SEQUENCES
    // =========================================================================

    async fn create_room(&self, payload: &Value) -> Result<Value, BridgeError> {
        let code = match payload.get("roomCode").and_then(Value::as_str) {
            Some(code) => normalize_code(code)?,
            None => generate_code(),
        };
        self.begin_connect()?;

        let accept = match self.inner.signaling.listen(&code).await {
            Ok(accept) => accept,
            Err(e) => return Err(self.connect_failed(e)),
        };

        let host = Arc::new(HostSide {
            code: code.clone(),
            room: tokio::sync::Mutex::new((self.inner.factory)(&code)),
            connections: Mutex::new(HashMap::new()),
            wake: Notify::new(),
            tasks: Mutex::new(Vec::new()),
        });
        self.finish_connect(Session::Host(Arc::clone(&host)))?;

        let registry = &self.inner.registry;
        host.track(tokio::spawn(accept_loop(Arc::clone(&host), Arc::clone(registry), accept)));
        host.track(tokio::spawn(drive_turns(Arc::clone(&host), Arc::clone(registry), self.inner.config.bot_delay)));

        info!(room = %code, host = %self.inner.local_id, "bridge: hosting room");
        Ok(success(json!({ "roomCode": code, "playerId": self.inner.local_id })))
    }

    async fn join_room(&self, payload: &Value) -> Result<Value, BridgeError> {
        let raw = payload.get("roomCode").and_then(Value::as_str).unwrap_or_default();
        let code = normalize_code(raw)?;
        self.begin_connect()?;

        let conn = match self.inner.signaling.connect(&code).await {
            Ok(conn) => conn,
            Err(e) => return Err(self.connect_failed(e)),
        };
        let Connection { outbound, inbound, .. } = conn;

        let peer = Arc::new(PeerSide {
            code: code.clone(),
            outbound,
            pending: Mutex::new(PendingTable::new(self.inner.config.max_pending)),
            reader: Mutex::new(None),
        });
        self.finish_connect(Session::Peer(Arc::clone(&peer)))?;

        let reader = tokio::spawn(read_upstream(
            Arc::clone(&peer),
            Arc::clone(&self.inner.registry),
            Arc::downgrade(&self.inner),
            inbound,
        ));
        *lock(&peer.reader) = Some(reader);

        info!(room = %code, "bridge: joined room");
        Ok(success(json!({ "roomCode": code })))
    }

    fn begin_connect(&self) -> Result<(), BridgeError> {
        let mut session = lock(&self.inner.session);
        if !matches!(*session, Session::Unconnected) {
            return Err(BridgeError::AlreadyConnected);
        }
        *session = Session::Connecting;
        Ok(())
    }

    /// Install the new session unless `disconnect` ran meanwhile.
    fn finish_connect(&self, next: Session) -> Result<(), BridgeError> {
        let mut session = lock(&self.inner.session);
        if !matches!(*session, Session::Connecting) {
            drop(session);
            next.shutdown();
            return Err(BridgeError::Disconnected);
        }
        *session = next;
        Ok(())
    }

    fn connect_failed(&self, err: TransportError) -> BridgeError {
        {
            let mut session = lock(&self.inner.session);
            if matches!(*session, Session::Connecting) {
                *session = Session::Unconnected;
            }
        }
        let err = BridgeError::from(err);
        self.raise_transport_error(&err);
        err
    }

    fn raise_transport_error(&self, err: &BridgeError) {
        warn!(error = %err, "bridge: transport error");
        self.inner.registry.invoke(TRANSPORT_ERROR, &json!({ "message": err.to_string(), "code": err.error_code() }));
    }

    fn role(&self) -> Option<Role> {
        match &*lock(&self.inner.session) {
            Session::Host(host) => Some(Role::Host(Arc::clone(host))),
            Session::Peer(peer) => Some(Role::Peer(Arc::clone(peer))),
            Session::Unconnected | Session::Connecting => None,
        }
    }
}

// =============================================================================
// ROOM CODES
// =============================================================================

fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| char::from(ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())]))
        .collect()
}

/// Uppercase and validate a user-supplied room code.
fn normalize_code(raw: &str) -> Result<String, BridgeError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() == ROOM_CODE_LEN && code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b)) {
        Ok(code)
    } else {
        Err(BridgeError::InvalidRoomCode(raw.to_owned()))
    }
}

// =============================================================================
// HOST TASKS
// =============================================================================

async fn accept_loop(host: Arc<HostSide>, registry: Arc<Registry>, mut accept: mpsc::Receiver<Connection>) {
    while let Some(conn) = accept.recv().await {
        info!(room = %host.code, peer = %conn.remote, "bridge: peer connected");
        lock(&host.connections).insert(conn.remote.clone(), conn.outbound.clone());
        let task = tokio::spawn(serve_peer(Arc::clone(&host), Arc::clone(&registry), conn));
        host.track(task);
    }
    debug!(room = %host.code, "bridge: accept loop ended");
}

async fn serve_peer(host: Arc<HostSide>, registry: Arc<Registry>, conn: Connection) {
    let Connection { remote, outbound, mut inbound } = conn;

    while let Some(mut frame) = inbound.recv().await {
        match frame.kind {
            Kind::Request => {
                let payload = std::mem::take(&mut frame.payload);
                let result = host.dispatch(&registry, &remote, frame.event_name(), payload).await;
                if frame.needs_reply && outbound.send(frame.reply(result)).await.is_err() {
                    break;
                }
            }
            Kind::Reply => debug!(room = %host.code, peer = %remote, "bridge: unexpected reply from peer"),
        }
    }

    info!(room = %host.code, peer = %remote, "bridge: peer disconnected");
    host.close_peer(&registry, &remote).await;
}

/// Step scripted players whenever one holds the turn.
async fn drive_turns(host: Arc<HostSide>, registry: Arc<Registry>, delay: Duration) {
    loop {
        host.wake.notified().await;
        loop {
            if !host.room.lock().await.bot_to_move() {
                break;
            }
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
            let mut room = host.room.lock().await;
            let Some(outcome) = room.bot_step() else { break };
            host.deliver(&registry, outcome.broadcasts);
        }
    }
}

// =============================================================================
// PEER TASKS
// =============================================================================

async fn read_upstream(
    peer: Arc<PeerSide>,
    registry: Arc<Registry>,
    inner: Weak<Inner>,
    mut inbound: mpsc::Receiver<Frame>,
) {
    while let Some(frame) = inbound.recv().await {
        match frame.kind {
            Kind::Reply => {
                let Some(id) = frame.correlation_id else {
                    debug!(room = %peer.code, "bridge: reply without correlation id");
                    continue;
                };
                let result = frame.result.unwrap_or(Value::Null);
                if !lock(&peer.pending).resolve(&id, result) {
                    debug!(room = %peer.code, %id, "bridge: late or unknown reply");
                }
            }
            Kind::Request => registry.invoke(frame.event_name(), &frame.payload),
        }
    }

    let failed = lock(&peer.pending).fail_all();
    info!(room = %peer.code, failed, "bridge: upstream closed");

    if let Some(inner) = inner.upgrade() {
        let mut session = lock(&inner.session);
        if matches!(&*session, Session::Peer(current) if Arc::ptr_eq(current, &peer)) {
            *session = Session::Unconnected;
        }
    }
    registry.invoke(DISCONNECTED, &json!({ "roomCode": peer.code }));
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
