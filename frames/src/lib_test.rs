use super::*;

fn sample_request() -> Frame {
    Frame {
        id: "id-1".to_owned(),
        kind: Kind::Request,
        event_name: Some("sneak".to_owned()),
        payload: serde_json::json!({
            "targetId": "B07",
            "useCard": true,
            "cardId": "I03",
            "tags": ["a", "b"],
            "nested": {"k": "v"},
            "nil": null
        }),
        needs_reply: true,
        correlation_id: Some("corr-1".to_owned()),
        result: None,
        peer: Some("peer-1".to_owned()),
        ts: 42,
    }
}

#[test]
fn kind_numeric_mapping_matches_wire_enum() {
    assert_eq!(Kind::Request.as_i32(), 0);
    assert_eq!(Kind::Reply.as_i32(), 1);
}

#[test]
fn kind_from_wire_rejects_out_of_range_value() {
    let err = Kind::from_i32(99).expect_err("kind should be invalid");
    assert!(matches!(err, CodecError::InvalidKind(99)));
}

#[test]
fn encode_decode_preserves_request() {
    let frame = sample_request();
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode should succeed");
    assert_eq!(decoded, frame);
}

#[test]
fn reply_result_survives_with_integer_numbers() {
    let frame = Frame {
        id: "id-2".to_owned(),
        kind: Kind::Reply,
        event_name: None,
        payload: serde_json::json!({}),
        needs_reply: false,
        correlation_id: Some("corr-1".to_owned()),
        result: Some(serde_json::json!({"success": true, "rolledValue": 5, "ratio": 0.5})),
        peer: None,
        ts: 7,
    };

    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    let result = decoded.result.expect("reply keeps its result");
    assert_eq!(result["rolledValue"].as_u64(), Some(5));
    assert_eq!(result["ratio"].as_f64(), Some(0.5));
    assert_eq!(decoded.correlation_id.as_deref(), Some("corr-1"));
}

#[test]
fn decode_frame_rejects_malformed_bytes() {
    let err = decode_frame(&[0xff, 0x00, 0x01]).expect_err("bytes should fail");
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn decode_frame_rejects_invalid_wire_kind() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        kind: 77,
        event_name: None,
        payload: None,
        needs_reply: false,
        correlation_id: None,
        result: None,
        peer: None,
        ts: 1,
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let err = decode_frame(&bytes).expect_err("kind should fail");
    assert!(matches!(err, CodecError::InvalidKind(77)));
}

#[test]
fn decode_frame_defaults_missing_payload_to_empty_object() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        kind: Kind::Request.as_i32(),
        event_name: Some("getHand".to_owned()),
        payload: None,
        needs_reply: true,
        correlation_id: None,
        result: None,
        peer: None,
        ts: 1,
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let frame = decode_frame(&bytes).expect("decode");
    assert_eq!(frame.payload, serde_json::json!({}));
    assert!(frame.result.is_none());
}

#[test]
fn decode_frame_converts_nan_number_to_json_null() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        kind: Kind::Request.as_i32(),
        event_name: None,
        payload: Some(prost_types::Value { kind: Some(prost_types::value::Kind::NumberValue(f64::NAN)) }),
        needs_reply: false,
        correlation_id: None,
        result: None,
        peer: None,
        ts: 1,
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let frame = decode_frame(&bytes).expect("decode");
    assert_eq!(frame.payload, serde_json::Value::Null);
}

#[test]
fn json_field_names_are_camel_case() {
    let json = serde_json::to_value(sample_request()).expect("serialize");
    assert_eq!(json["eventName"], "sneak");
    assert_eq!(json["needsReply"], true);
    assert_eq!(json["correlationId"], "corr-1");
    assert_eq!(json["kind"], "request");
}
