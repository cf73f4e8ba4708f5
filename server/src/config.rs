//! Host and relay configuration parsed from environment variables.
//!
//! Every knob has a typed default so a bare environment runs a standard
//! four-seat room. Values that are present but unparsable are rejected rather
//! than silently replaced by the default.

use std::path::PathBuf;
use std::time::Duration;

use crate::frame::ErrorCode;

pub const DEFAULT_MAX_PLAYERS: usize = 4;
pub const DEFAULT_INITIAL_HAND: usize = 3;
pub const DEFAULT_VISIBLE_SLOTS: usize = 3;
pub const DEFAULT_BOT_DELAY_MS: u64 = 1500;
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_PENDING: usize = 256;
pub const DEFAULT_RELAY_PORT: u16 = 3000;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{key} must be between {min} and {max}, got {value}")]
    OutOfRange { key: &'static str, min: usize, max: usize, value: usize },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidValue { .. } => "E_CONFIG_INVALID",
            Self::OutOfRange { .. } => "E_CONFIG_RANGE",
        }
    }
}

// =============================================================================
// HOST CONFIG
// =============================================================================

/// Settings for a hosted room and the bridge that carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Seat cap, checked before a player is created.
    pub max_players: usize,
    /// Resource cards dealt to each player at game start.
    pub initial_hand: usize,
    /// Face-up target slots.
    pub visible_slots: usize,
    /// Visual delay before a bot acts.
    pub bot_delay: Duration,
    /// How long a peer waits for a correlated reply.
    pub call_timeout: Duration,
    /// Outstanding calls allowed per peer bridge.
    pub max_pending: usize,
    /// Card dataset override. The compiled-in set is used when absent.
    pub cards_path: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_players: DEFAULT_MAX_PLAYERS,
            initial_hand: DEFAULT_INITIAL_HAND,
            visible_slots: DEFAULT_VISIBLE_SLOTS,
            bot_delay: Duration::from_millis(DEFAULT_BOT_DELAY_MS),
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            max_pending: DEFAULT_MAX_PENDING,
            cards_path: None,
        }
    }
}

impl HostConfig {
    /// Build typed host config from environment variables.
    ///
    /// Optional:
    /// - `PEERHOST_MAX_PLAYERS`: default 4 (1..=8)
    /// - `PEERHOST_INITIAL_HAND`: default 3
    /// - `PEERHOST_VISIBLE_SLOTS`: default 3 (1..=6)
    /// - `PEERHOST_BOT_DELAY_MS`: default 1500
    /// - `PEERHOST_CALL_TIMEOUT_SECS`: default 10
    /// - `PEERHOST_MAX_PENDING`: default 256
    /// - `PEERHOST_CARDS_PATH`: card dataset JSON file
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is set but unparsable or out of
    /// range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`HostConfig::from_env`] over an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`HostConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let max_players = env_parse(&lookup, "PEERHOST_MAX_PLAYERS", DEFAULT_MAX_PLAYERS)?;
        check_range("PEERHOST_MAX_PLAYERS", max_players, 1, 8)?;
        let visible_slots = env_parse(&lookup, "PEERHOST_VISIBLE_SLOTS", DEFAULT_VISIBLE_SLOTS)?;
        check_range("PEERHOST_VISIBLE_SLOTS", visible_slots, 1, 6)?;
        let max_pending = env_parse(&lookup, "PEERHOST_MAX_PENDING", DEFAULT_MAX_PENDING)?;
        check_range("PEERHOST_MAX_PENDING", max_pending, 1, usize::MAX)?;

        Ok(Self {
            max_players,
            initial_hand: env_parse(&lookup, "PEERHOST_INITIAL_HAND", DEFAULT_INITIAL_HAND)?,
            visible_slots,
            bot_delay: Duration::from_millis(env_parse(&lookup, "PEERHOST_BOT_DELAY_MS", DEFAULT_BOT_DELAY_MS)?),
            call_timeout: Duration::from_secs(env_parse(
                &lookup,
                "PEERHOST_CALL_TIMEOUT_SECS",
                DEFAULT_CALL_TIMEOUT_SECS,
            )?),
            max_pending,
            cards_path: lookup("PEERHOST_CARDS_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        })
    }
}

// =============================================================================
// RELAY CONFIG
// =============================================================================

/// Settings for the relay broker binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    pub port: u16,
    /// Per-socket outbound queue depth.
    pub channel_capacity: usize,
}

impl RelayConfig {
    /// `PORT` (default 3000) and `RELAY_CHANNEL_CAPACITY` (default 256).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unparsable values or a zero capacity.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// # Errors
    ///
    /// See [`RelayConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let channel_capacity = env_parse(&lookup, "RELAY_CHANNEL_CAPACITY", DEFAULT_CHANNEL_CAPACITY)?;
        check_range("RELAY_CHANNEL_CAPACITY", channel_capacity, 1, usize::MAX)?;
        Ok(Self { port: env_parse(&lookup, "PORT", DEFAULT_RELAY_PORT)?, channel_capacity })
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

fn check_range(key: &'static str, value: usize, min: usize, max: usize) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { key, min, max, value })
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
