//! Outstanding calls awaiting a correlated reply.
//!
//! Each entry is a oneshot continuation plus a deadline. The table is bounded;
//! expired entries are swept on insert, and closing the upstream link fails
//! every entry at once.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::BridgeError;

pub(crate) type Reply = Result<Value, BridgeError>;

struct Pending {
    tx: oneshot::Sender<Reply>,
    deadline: Instant,
}

pub(crate) struct PendingTable {
    entries: HashMap<Uuid, Pending>,
    capacity: usize,
}

impl PendingTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { entries: HashMap::new(), capacity: capacity.max(1) }
    }

    /// Register a call. Fails when the table is full after sweeping.
    pub(crate) fn insert(&mut self, id: Uuid, deadline: Instant) -> Result<oneshot::Receiver<Reply>, BridgeError> {
        self.evict_expired(Instant::now());
        if self.entries.len() >= self.capacity {
            return Err(BridgeError::TooManyPending { limit: self.capacity });
        }
        let (tx, rx) = oneshot::channel();
        self.entries.insert(id, Pending { tx, deadline });
        Ok(rx)
    }

    /// Complete the call. `false` when no entry matched (late or unknown reply).
    pub(crate) fn resolve(&mut self, id: &Uuid, result: Value) -> bool {
        match self.entries.remove(id) {
            Some(pending) => {
                let _ = pending.tx.send(Ok(result));
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&mut self, id: &Uuid) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Fail every entry whose deadline has passed. Returns the count.
    pub(crate) fn evict_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<Uuid> =
            self.entries.iter().filter(|(_, p)| p.deadline <= now).map(|(id, _)| *id).collect();
        for id in &expired {
            if let Some(pending) = self.entries.remove(id) {
                let _ = pending.tx.send(Err(BridgeError::Timeout));
            }
        }
        expired.len()
    }

    /// Fail every entry with [`BridgeError::Disconnected`].
    pub(crate) fn fail_all(&mut self) -> usize {
        let count = self.entries.len();
        for (_, pending) in self.entries.drain() {
            let _ = pending.tx.send(Err(BridgeError::Disconnected));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
