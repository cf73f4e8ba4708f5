//! Seam between the bridge and the authoritative state machine it carries.
//!
//! Handlers are pure state transitions: they validate, mutate, and return an
//! [`Outcome`]. The bridge owns every outbound concern (reply to the caller,
//! broadcast to local handlers and connected peers).

use serde_json::Value;

/// One broadcast produced by an action.
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast {
    pub event: String,
    pub payload: Value,
}

impl Broadcast {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self { event: event.into(), payload }
    }
}

/// Result returned by a dispatcher. `broadcasts` are delivered in order,
/// before the caller sees `result`.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub result: Value,
    pub broadcasts: Vec<Broadcast>,
}

impl Outcome {
    #[must_use]
    pub fn reply(result: Value) -> Self {
        Self { result, broadcasts: Vec::new() }
    }
}

/// Host-side state machine driven by the bridge.
///
/// Calls are serialized by the bridge: at most one method runs at a time.
pub trait Dispatcher: Send + 'static {
    /// Apply one action from `sender` (player identity = connection address).
    fn dispatch(&mut self, sender: &str, event: &str, payload: Value) -> Outcome;

    /// A peer's connection closed.
    fn peer_closed(&mut self, peer: &str) -> Outcome;

    /// Whether a scripted player holds the turn.
    fn bot_to_move(&self) -> bool {
        false
    }

    /// Perform one scripted action. `None` when no bot holds the turn.
    fn bot_step(&mut self) -> Option<Outcome> {
        None
    }
}

/// Builds the dispatcher for a newly created room code.
pub type DispatcherFactory = std::sync::Arc<dyn Fn(&str) -> Box<dyn Dispatcher> + Send + Sync>;
