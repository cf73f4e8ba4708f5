//! Frame — the unit of traffic between a peer and its host.
//!
//! ARCHITECTURE
//! ============
//! Application code calls `emit` on the bridge; on a peer that becomes a
//! request frame sent to the host, and the host answers with a reply frame
//! carrying the same `correlation_id`. Host broadcasts travel as request
//! frames with `needs_reply = false`.
//!
//! DESIGN
//! ======
//! - The bridge routes on `kind` and `correlation_id` only; it never inspects
//!   `payload` or `result`.
//! - Results are JSON objects with a `success` flag. Failures carry a
//!   human-readable `error` and a grepable `code`.
//! - `frames::Frame` is the wire twin; conversions live at the bottom.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use frames::Kind;

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Result key for the success flag.
pub const RESULT_SUCCESS: &str = "success";

/// Result key for the human-readable failure reason.
pub const RESULT_ERROR: &str = "error";

/// Result key for grepable error codes.
pub const RESULT_CODE: &str = "code";

// =============================================================================
// TYPES
// =============================================================================

/// One message on a peer link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub id: Uuid,
    pub kind: Kind,
    pub event_name: Option<String>,
    pub payload: Value,
    pub needs_reply: bool,
    pub correlation_id: Option<Uuid>,
    pub result: Option<Value>,
    /// Relay routing key. Only set on the relay hop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    pub ts: i64,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code attached to structured failure results.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    /// Create a one-way event frame (broadcasts, fire-and-forget emits).
    pub fn event(event_name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: Kind::Request,
            event_name: Some(event_name.into()),
            payload,
            needs_reply: false,
            correlation_id: None,
            result: None,
            peer: None,
            ts: now_ms(),
        }
    }

    /// Create a request frame that expects exactly one correlated reply.
    pub fn call(event_name: impl Into<String>, payload: Value) -> Self {
        let mut frame = Self::event(event_name, payload);
        frame.needs_reply = true;
        frame.correlation_id = Some(Uuid::new_v4());
        frame
    }

    /// Build the reply to this request. Inherits `correlation_id`.
    #[must_use]
    pub fn reply(&self, result: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: Kind::Reply,
            event_name: None,
            payload: Value::Object(Map::new()),
            needs_reply: false,
            correlation_id: self.correlation_id,
            result: Some(result),
            peer: None,
            ts: now_ms(),
        }
    }

    #[must_use]
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    /// Event name, or empty for replies.
    #[must_use]
    pub fn event_name(&self) -> &str {
        self.event_name.as_deref().unwrap_or_default()
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// Successful result. Object fields of `data` are merged next to `success`.
#[must_use]
pub fn success(data: Value) -> Value {
    let mut out = match data {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            map
        }
    };
    out.insert(RESULT_SUCCESS.into(), Value::Bool(true));
    Value::Object(out)
}

/// Structured failure result from a typed error.
#[must_use]
pub fn failure(err: &(impl ErrorCode + ?Sized)) -> Value {
    let mut out = Map::new();
    out.insert(RESULT_SUCCESS.into(), Value::Bool(false));
    out.insert(RESULT_ERROR.into(), Value::String(err.to_string()));
    out.insert(RESULT_CODE.into(), Value::String(err.error_code().to_string()));
    Value::Object(out)
}

/// Whether a result reports success.
#[must_use]
pub fn is_success(result: &Value) -> bool {
    result
        .get(RESULT_SUCCESS)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

// =============================================================================
// WIRE CONVERSION
// =============================================================================

/// Error converting a wire frame into a [`Frame`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid uuid in field `{field}`: {value}")]
    InvalidUuid { field: &'static str, value: String },
    #[error("codec error: {0}")]
    Codec(#[from] frames::CodecError),
}

impl From<&Frame> for frames::Frame {
    fn from(frame: &Frame) -> Self {
        Self {
            id: frame.id.to_string(),
            kind: frame.kind,
            event_name: frame.event_name.clone(),
            payload: frame.payload.clone(),
            needs_reply: frame.needs_reply,
            correlation_id: frame.correlation_id.map(|id| id.to_string()),
            result: frame.result.clone(),
            peer: frame.peer.clone(),
            ts: frame.ts,
        }
    }
}

impl TryFrom<frames::Frame> for Frame {
    type Error = FrameError;

    fn try_from(wire: frames::Frame) -> Result<Self, Self::Error> {
        let id = parse_uuid("id", &wire.id)?;
        let correlation_id = wire
            .correlation_id
            .as_deref()
            .map(|raw| parse_uuid("correlation_id", raw))
            .transpose()?;
        Ok(Self {
            id,
            kind: wire.kind,
            event_name: wire.event_name,
            payload: wire.payload,
            needs_reply: wire.needs_reply,
            correlation_id,
            result: wire.result,
            peer: wire.peer,
            ts: wire.ts,
        })
    }
}

fn parse_uuid(field: &'static str, raw: &str) -> Result<Uuid, FrameError> {
    raw.parse()
        .map_err(|_| FrameError::InvalidUuid { field, value: raw.to_owned() })
}

/// Encode a frame for a byte-oriented hop.
#[must_use]
pub fn encode(frame: &Frame) -> Vec<u8> {
    frames::encode_frame(&frames::Frame::from(frame))
}

/// Decode bytes from a byte-oriented hop.
///
/// # Errors
///
/// Returns a codec error for malformed bytes, or `InvalidUuid` when an id
/// field is not a UUID.
pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
    Frame::try_from(frames::decode_frame(bytes)?)
}

// =============================================================================
// TESTS
// =============================================================================
