//! In-process signaling hub.
//!
//! Listeners are keyed by address in a shared map; `connect` builds a pair of
//! bounded channels and hands one end to the listener. Dropping either end
//! closes the link for the other side, mirroring a real peer connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use super::{Connection, Signaling, TransportError};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct MemoryHub {
    listeners: Arc<Mutex<HashMap<String, mpsc::Sender<Connection>>>>,
    next_peer: Arc<AtomicU64>,
    capacity: usize,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MemoryHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hub whose links buffer at most `capacity` frames per direction.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_peer: Arc::new(AtomicU64::new(1)),
            capacity: capacity.max(1),
        }
    }

    fn listeners(&self) -> std::sync::MutexGuard<'_, HashMap<String, mpsc::Sender<Connection>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Signaling for MemoryHub {
    async fn listen(&self, address: &str) -> Result<mpsc::Receiver<Connection>, TransportError> {
        let mut listeners = self.listeners();
        if listeners.get(address).is_some_and(|tx| !tx.is_closed()) {
            return Err(TransportError::AddressInUse(address.to_owned()));
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        listeners.insert(address.to_owned(), tx);
        info!(%address, "memory: listening");
        Ok(rx)
    }

    async fn connect(&self, address: &str) -> Result<Connection, TransportError> {
        let listener = self
            .listeners()
            .get(address)
            .cloned()
            .ok_or_else(|| TransportError::Unavailable(address.to_owned()))?;

        let peer = format!("mem-{}", self.next_peer.fetch_add(1, Ordering::Relaxed));
        let (to_host, from_peer) = mpsc::channel(self.capacity);
        let (to_peer, from_host) = mpsc::channel(self.capacity);

        let host_side = Connection { remote: peer.clone(), outbound: to_peer, inbound: from_peer };
        if listener.send(host_side).await.is_err() {
            self.listeners().remove(address);
            return Err(TransportError::Unavailable(address.to_owned()));
        }

        info!(%address, %peer, "memory: connected");
        Ok(Connection { remote: address.to_owned(), outbound: to_host, inbound: from_host })
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
