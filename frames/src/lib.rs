//! Wire envelope and protobuf codec for the peer relay.
//!
//! Every hop (in-process channel, relay websocket) carries the same envelope:
//! a `request` naming an event, or a `reply` correlated to an earlier request.
//! Payloads stay flexible (`serde_json::Value`) and are encoded as
//! `google.protobuf.Value` for compact binary transport.

use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw bytes could not be decoded as a protobuf `WireFrame`.
    #[error("failed to decode protobuf frame: {0}")]
    Decode(#[from] prost::DecodeError),
    /// The `kind` integer on the wire does not map to a known [`Kind`].
    #[error("invalid frame kind: {0}")]
    InvalidKind(i32),
}

/// Role of a frame in a request/reply exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// An event: an action sent to the host, or a broadcast sent to a peer.
    Request,
    /// The result of an earlier request that asked for one.
    Reply,
}

impl Kind {
    /// Convert kind into wire enum integer value.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Request => WireFrameKind::Request as i32,
            Self::Reply => WireFrameKind::Reply as i32,
        }
    }

    fn from_i32(value: i32) -> Result<Self, CodecError> {
        match WireFrameKind::try_from(value) {
            Ok(WireFrameKind::Request) => Ok(Self::Request),
            Ok(WireFrameKind::Reply) => Ok(Self::Reply),
            Err(_) => Err(CodecError::InvalidKind(value)),
        }
    }
}

/// A single message on the relay wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Unique identifier for this frame (UUID string).
    pub id: String,
    pub kind: Kind,
    /// Event name. Present on requests.
    pub event_name: Option<String>,
    pub payload: Value,
    /// Whether the sender is waiting for a reply.
    pub needs_reply: bool,
    /// Pairs a reply with its request.
    pub correlation_id: Option<String>,
    /// Present on replies.
    pub result: Option<Value>,
    /// Relay routing key: the remote peer on a multiplexed host link.
    pub peer: Option<String>,
    /// Milliseconds since the Unix epoch when the frame was created.
    pub ts: i64,
}

/// Encode a frame into protobuf bytes.
#[must_use]
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let wire = frame_to_wire(frame);

    let mut out = Vec::with_capacity(wire.encoded_len());
    // Encoding into a growable Vec cannot run out of buffer space.
    wire.encode(&mut out).unwrap_or_default();
    out
}

/// Decode protobuf bytes into a frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed bytes and
/// [`CodecError::InvalidKind`] for out-of-range kind values.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    let wire = WireFrame::decode(bytes)?;
    wire_to_frame(wire)
}

fn frame_to_wire(frame: &Frame) -> WireFrame {
    WireFrame {
        id: frame.id.clone(),
        kind: frame.kind.as_i32(),
        event_name: frame.event_name.clone(),
        payload: Some(json_to_proto_value(&frame.payload)),
        needs_reply: frame.needs_reply,
        correlation_id: frame.correlation_id.clone(),
        result: frame.result.as_ref().map(json_to_proto_value),
        peer: frame.peer.clone(),
        ts: frame.ts,
    }
}

fn wire_to_frame(wire: WireFrame) -> Result<Frame, CodecError> {
    Ok(Frame {
        id: wire.id,
        kind: Kind::from_i32(wire.kind)?,
        event_name: wire.event_name,
        payload: wire
            .payload
            .map_or(Value::Object(Map::new()), |v| proto_to_json_value(&v)),
        needs_reply: wire.needs_reply,
        correlation_id: wire.correlation_id,
        result: wire.result.map(|v| proto_to_json_value(&v)),
        peer: wire.peer,
        ts: wire.ts,
    })
}

fn json_to_proto_value(value: &Value) -> prost_types::Value {
    use prost_types::value::Kind as ProtoKind;

    let kind = match value {
        Value::Null => ProtoKind::NullValue(prost_types::NullValue::NullValue as i32),
        Value::Bool(v) => ProtoKind::BoolValue(*v),
        Value::Number(v) => ProtoKind::NumberValue(v.as_f64().unwrap_or(0.0)),
        Value::String(v) => ProtoKind::StringValue(v.clone()),
        Value::Array(v) => ProtoKind::ListValue(prost_types::ListValue { values: v.iter().map(json_to_proto_value).collect() }),
        Value::Object(v) => ProtoKind::StructValue(prost_types::Struct {
            fields: v
                .iter()
                .map(|(k, v)| (k.clone(), json_to_proto_value(v)))
                .collect(),
        }),
    };

    prost_types::Value { kind: Some(kind) }
}

/// Largest integer magnitude an `f64` represents exactly (2^53).
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

fn proto_number_to_json(v: f64) -> Value {
    // Dice values, counts and scores must come back as integers so typed
    // payload parsing (`u8`, `u32`) keeps working after a protobuf hop.
    if v.is_finite() && v.fract() == 0.0 && v.abs() <= MAX_EXACT_INT {
        #[allow(clippy::cast_possible_truncation)]
        return Value::from(v as i64);
    }
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}

fn proto_to_json_value(value: &prost_types::Value) -> Value {
    use prost_types::value::Kind as ProtoKind;

    let Some(kind) = &value.kind else {
        return Value::Null;
    };

    match kind {
        ProtoKind::NullValue(_) => Value::Null,
        ProtoKind::NumberValue(v) => proto_number_to_json(*v),
        ProtoKind::StringValue(v) => Value::String(v.clone()),
        ProtoKind::BoolValue(v) => Value::Bool(*v),
        ProtoKind::StructValue(v) => Value::Object(
            v.fields
                .iter()
                .map(|(k, v)| (k.clone(), proto_to_json_value(v)))
                .collect(),
        ),
        ProtoKind::ListValue(v) => Value::Array(v.values.iter().map(proto_to_json_value).collect()),
    }
}

#[derive(Clone, PartialEq, Message)]
struct WireFrame {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(enumeration = "WireFrameKind", tag = "2")]
    kind: i32,
    #[prost(string, optional, tag = "3")]
    event_name: Option<String>,
    #[prost(message, optional, tag = "4")]
    payload: Option<prost_types::Value>,
    #[prost(bool, tag = "5")]
    needs_reply: bool,
    #[prost(string, optional, tag = "6")]
    correlation_id: Option<String>,
    #[prost(message, optional, tag = "7")]
    result: Option<prost_types::Value>,
    #[prost(string, optional, tag = "8")]
    peer: Option<String>,
    #[prost(int64, tag = "9")]
    ts: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum WireFrameKind {
    Request = 0,
    Reply = 1,
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
