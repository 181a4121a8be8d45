//! Integration tests for the wire codec.
//!
//! These tests verify envelope decoding and encoding through the public
//! API: the three envelope kinds, error payloads, and rejection of
//! malformed frames.

use remote_mcp::mcp::error::DecodeError;
use remote_mcp::mcp::protocol::{
    decode, encode, Envelope, ErrorCode, ErrorObject, Notification, Outcome, Request, RequestId,
    Response,
};
use serde_json::json;

// =============================================================================
// Decoding Tests
// =============================================================================

#[test]
fn test_decode_initialize_request() {
    let frame = br#"{
        "kind": "request",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {
                "name": "test-client",
                "version": "1.0.0"
            }
        }
    }"#;

    let envelope = decode(frame).unwrap();
    if let Envelope::Request(req) = envelope {
        assert_eq!(req.method, "initialize");
        assert_eq!(req.id, RequestId::Number(1));
        assert_eq!(req.params.unwrap()["clientInfo"]["name"], "test-client");
    } else {
        panic!("Expected Request");
    }
}

#[test]
fn test_decode_string_id() {
    let frame = br#"{"kind":"request","id":"abc-1","method":"tools/list"}"#;

    let envelope = decode(frame).unwrap();
    assert_eq!(envelope.id(), Some(&RequestId::String("abc-1".to_string())));
    assert_eq!(envelope.method(), "tools/list");
}

#[test]
fn test_decode_notification() {
    let frame = br#"{"kind":"notification","method":"notifications/initialized"}"#;

    if let Envelope::Notification(notif) = decode(frame).unwrap() {
        assert_eq!(notif.method, "notifications/initialized");
        assert!(notif.params.is_none());
    } else {
        panic!("Expected Notification");
    }
}

#[test]
fn test_decode_error_response() {
    let frame = br#"{
        "kind": "response",
        "id": 4,
        "method": "tools/call",
        "error": {"code": -32602, "message": "missing required parameter 'b'"}
    }"#;

    if let Envelope::Response(resp) = decode(frame).unwrap() {
        match resp.outcome {
            Outcome::Error(error) => {
                assert_eq!(error.code, ErrorCode::InvalidArguments);
                assert!(error.message.contains("'b'"));
            }
            Outcome::Result(_) => panic!("Expected error outcome"),
        }
    } else {
        panic!("Expected Response");
    }
}

#[test]
fn test_decode_unknown_error_code() {
    let frame = br#"{"kind":"response","id":4,"method":"x","error":{"code":-31999,"message":"?"}}"#;

    if let Envelope::Response(resp) = decode(frame).unwrap() {
        assert_eq!(
            resp.outcome,
            Outcome::Error(ErrorObject::with_message(ErrorCode::Other(-31999), "?"))
        );
    } else {
        panic!("Expected Response");
    }
}

// =============================================================================
// Rejection Tests
// =============================================================================

#[test]
fn test_decode_invalid_json() {
    assert!(matches!(
        decode(b"not valid json"),
        Err(DecodeError::Malformed(_))
    ));
}

#[test]
fn test_decode_truncated_frame() {
    assert!(matches!(
        decode(br#"{"kind":"request","id":1,"meth"#),
        Err(DecodeError::Malformed(_))
    ));
}

#[test]
fn test_decode_missing_kind() {
    assert!(matches!(
        decode(br#"{"id":1,"method":"ping"}"#),
        Err(DecodeError::MissingField("kind"))
    ));
}

#[test]
fn test_decode_unknown_kind() {
    assert!(matches!(
        decode(br#"{"kind":"event","method":"ping"}"#),
        Err(DecodeError::UnknownKind(kind)) if kind == "event"
    ));
}

#[test]
fn test_decode_null_id() {
    assert!(matches!(
        decode(br#"{"kind":"request","id":null,"method":"ping"}"#),
        Err(DecodeError::InvalidField { field: "id", .. })
    ));
}

#[test]
fn test_decode_response_with_both_outcomes() {
    assert!(matches!(
        decode(br#"{"kind":"response","id":1,"method":"ping","result":{},"error":{"code":1,"message":"x"}}"#),
        Err(DecodeError::AmbiguousOutcome)
    ));
}

#[test]
fn test_decode_non_object() {
    assert!(matches!(decode(b"[1,2,3]"), Err(DecodeError::NotAnObject)));
}

// =============================================================================
// Encoding Tests
// =============================================================================

#[test]
fn test_encode_has_no_jsonrpc_field() {
    let frame = encode(&Request::new(RequestId::Number(1), "ping").into());
    let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();

    assert_eq!(value["kind"], "request");
    assert!(value.get("jsonrpc").is_none());
    assert!(value.get("params").is_none());
}

#[test]
fn test_encoded_frames_round_trip() {
    let envelopes: Vec<Envelope> = vec![
        Request::new(RequestId::from("r-1"), "resources/read")
            .with_params(json!({"uri": "mcp://greeting/User"}))
            .into(),
        Response::success(RequestId::Number(2), "tools/call", json!({"structuredContent": 8.0})).into(),
        Response::error(
            RequestId::Number(3),
            "prompts/get",
            ErrorObject::from_code(ErrorCode::InvalidOutput).with_data(json!({"role": "system"})),
        )
        .into(),
        Notification::new("notifications/cancelled", Some(json!({"requestId": 2}))).into(),
    ];

    for envelope in envelopes {
        let frame = encode(&envelope);
        assert!(!frame.contains(&b'\n'));
        assert_eq!(decode(&frame).unwrap(), envelope);
    }
}
