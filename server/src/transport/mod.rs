//! Transport adapter: ordered, reliable frame links between peers.
//!
//! DESIGN
//! ======
//! A [`Signaling`] provider turns a room code into links. The hosting side
//! calls `listen(code)` and receives one [`Connection`] per inbound peer; a
//! joining side calls `connect(code)` and gets a single upstream connection.
//! A connection is a pair of channels: frames pushed into `outbound` reach the
//! remote, frames from the remote arrive on `inbound`, and `inbound` yielding
//! `None` means the link closed.
//!
//! Providers:
//! - [`memory::MemoryHub`]: in-process, for tests and local play.
//! - [`ws::WsSignaling`]: websocket client of the relay broker.

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::frame::{ErrorCode, Frame};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("address already in use: {0}")]
    AddressInUse(String),
    #[error("peer unavailable: {0}")]
    Unavailable(String),
    #[error("connection closed")]
    Closed,
    #[error("relay protocol error: {0}")]
    Protocol(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl ErrorCode for TransportError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::AddressInUse(_) => "E_ADDRESS_IN_USE",
            Self::Unavailable(_) => "E_PEER_UNAVAILABLE",
            Self::Closed => "E_TRANSPORT_CLOSED",
            Self::Protocol(_) => "E_RELAY_PROTOCOL",
            Self::WebSocket(_) => "E_WEBSOCKET",
        }
    }
}

/// One established link to a remote peer.
#[derive(Debug)]
pub struct Connection {
    /// Remote address: the peer id on the hosting side, the room code on the
    /// joining side.
    pub remote: String,
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<Frame>,
}

#[async_trait]
pub trait Signaling: Send + Sync {
    /// Register `address` for discovery and yield inbound connections.
    async fn listen(&self, address: &str) -> Result<mpsc::Receiver<Connection>, TransportError>;

    /// Dial a listening address.
    async fn connect(&self, address: &str) -> Result<Connection, TransportError>;
}
