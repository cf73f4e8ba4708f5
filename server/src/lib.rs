//! Host-authoritative room relay.
//!
//! SYSTEM CONTEXT
//! ==============
//! One player's process hosts a room and runs its state machine; other
//! players join over a transport and talk to the host through the same
//! emit/on surface. The relay broker binary forwards frames for peers that
//! cannot reach each other directly.

pub mod bridge;
pub mod config;
pub mod frame;
pub mod game;
pub mod relay;
pub mod transport;
