//! Unit tests for the event codec.
//!
//! Covers native decoding, the wire notifications the gateway emits, the
//! open-ended `Opaque` fallback, and the caller-facing chunk encoding.

use serde_json::json;

use agent_bridge::events::{
    decode_native, decode_wire, encode_notification, result_text, CallOutcome, StreamChunk,
    StreamEvent,
};

fn native(msg: serde_json::Value) -> serde_json::Value {
    json!({"jsonrpc": "2.0", "method": "codex/event", "params": {"msg": msg}})
}

// ── Native decoding ─────────────────────────────────────────────────────────

/// The envelope and the bare `msg` decode to the same event.
#[test]
fn envelope_and_bare_msg_decode_alike() {
    let msg = json!({"type": "agent_message_delta", "delta": "Hel"});
    let expected = Some(StreamEvent::MessageDelta {
        delta: "Hel".into(),
    });

    assert_eq!(decode_native(&native(msg.clone())), expected);
    assert_eq!(decode_native(&msg), expected);
}

/// `session_configured` is the readiness marker.
#[test]
fn session_configured_is_connection_established() {
    let raw = native(json!({"type": "session_configured", "model": "o3"}));
    assert_eq!(
        decode_native(&raw),
        Some(StreamEvent::ConnectionEstablished)
    );
}

/// Both reasoning flavours decode to `ReasoningDelta`, distinguished by `raw`.
#[test]
fn reasoning_variants_keep_raw_flag() {
    let summary = decode_native(&json!({"type": "agent_reasoning_delta", "delta": "a"}));
    let raw = decode_native(&json!({"type": "agent_reasoning_raw_content_delta", "delta": "b"}));

    assert_eq!(
        summary,
        Some(StreamEvent::ReasoningDelta {
            raw: false,
            delta: "a".into()
        })
    );
    assert_eq!(
        raw,
        Some(StreamEvent::ReasoningDelta {
            raw: true,
            delta: "b".into()
        })
    );
}

/// An `mcp_tool_call_end` carrying an error exposes it.
#[test]
fn tool_call_end_surfaces_error() {
    let event = decode_native(&json!({
        "type": "mcp_tool_call_end",
        "call_id": "c1",
        "error": "permission denied"
    }))
    .expect("tool call end must decode");

    match event {
        StreamEvent::ToolCallEnd { error, payload } => {
            assert_eq!(error.as_deref(), Some("permission denied"));
            assert_eq!(payload["call_id"], "c1");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

/// Unknown types are kept, not rejected.
#[test]
fn unknown_type_becomes_opaque() {
    let event = decode_native(&json!({"type": "custom_thing", "foo": 1}))
        .expect("typed message must decode");

    assert_eq!(
        event,
        StreamEvent::Opaque {
            event_type: "custom_thing".into(),
            payload: json!({"type": "custom_thing", "foo": 1}),
        }
    );
    assert_eq!(event.event_type(), "custom_thing");
}

/// Messages without a `type` do not decode.
#[test]
fn untyped_message_is_none() {
    assert_eq!(decode_native(&json!({"delta": "x"})), None);
    assert_eq!(decode_native(&native(json!({"delta": "x"}))), None);
}

// ── Wire encoding ───────────────────────────────────────────────────────────

/// `task_complete` is forwarded exactly as received.
#[test]
fn task_complete_round_trips_unchanged() {
    let raw = native(json!({"type": "task_complete", "last_agent_message": "Done"}));
    let event = decode_native(&raw).expect("task_complete must decode");

    assert_eq!(encode_notification(&event), Some(raw));
}

/// Opaque events become informational log notifications carrying the payload.
#[test]
fn opaque_encodes_as_info_message() {
    let event = decode_native(&json!({"type": "custom_thing", "foo": 1}))
        .expect("typed message must decode");
    let wire = encode_notification(&event).expect("opaque events are forwarded");

    assert_eq!(wire["method"], "notifications/message");
    assert_eq!(wire["params"]["level"], "info");
    assert_eq!(wire["params"]["data"], json!({"type": "custom_thing", "foo": 1}));
}

/// Deltas are renamed under `notifications/`.
#[test]
fn delta_encodes_under_notifications_namespace() {
    let wire = encode_notification(&StreamEvent::MessageDelta {
        delta: "Hel".into(),
    })
    .expect("deltas are forwarded");

    assert_eq!(wire["jsonrpc"], "2.0");
    assert_eq!(wire["method"], "notifications/agent_message_delta");
    assert_eq!(wire["params"]["delta"], "Hel");
    assert!(wire.get("id").is_none(), "notifications never carry an id");
}

/// The readiness marker has no wire form.
#[test]
fn connection_established_is_not_forwarded() {
    assert_eq!(
        encode_notification(&StreamEvent::ConnectionEstablished),
        None
    );
}

/// Whatever the gateway emits, the client decodes back to the same event.
#[test]
fn client_decodes_gateway_output() {
    let events = [
        StreamEvent::MessageDelta {
            delta: "x".into(),
        },
        StreamEvent::ReasoningDelta {
            raw: true,
            delta: "y".into(),
        },
        StreamEvent::Opaque {
            event_type: "turn_diff".into(),
            payload: json!({"type": "turn_diff", "unified_diff": ""}),
        },
    ];

    for event in events {
        let wire = encode_notification(&event).expect("event is forwarded");
        assert_eq!(decode_wire(&wire), Some(event));
    }
}

/// Plain log notifications without a typed payload are not events.
#[test]
fn untyped_log_message_is_not_an_event() {
    let wire = json!({
        "jsonrpc": "2.0",
        "method": "notifications/message",
        "params": {"level": "info", "data": "warming up"}
    });
    assert_eq!(decode_wire(&wire), None);
}

// ── Results and chunks ──────────────────────────────────────────────────────

/// The first text item of a tool result is the answer.
#[test]
fn result_text_reads_first_text_item() {
    let payload = json!({"content": [{"type": "image"}, {"type": "text", "text": "Answer"}]});
    assert_eq!(result_text(&payload).as_deref(), Some("Answer"));
    assert_eq!(result_text(&json!({"content": []})), None);
}

/// Chunks serialize with a `type` tag for external consumers.
#[test]
fn chunks_serialize_tagged() {
    let chunk = serde_json::to_value(StreamChunk::Chunk("Hel".into())).expect("serializable");
    assert_eq!(chunk, json!({"type": "chunk", "content": "Hel"}));

    let done = StreamChunk::Result(CallOutcome {
        text: Some("Hello".into()),
        ..CallOutcome::default()
    });
    assert!(done.is_terminal());
    assert!(!StreamChunk::Reasoning("r".into()).is_terminal());
    let value = serde_json::to_value(done).expect("serializable");
    assert_eq!(value["type"], "result");
    assert_eq!(value["content"]["text"], "Hello");
}
