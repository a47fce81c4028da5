mod common;

use std::sync::mpsc::Receiver;
use std::time::Duration;

use serde_json::json;

use common::{settings, Script};
use realtime_car_demo::config::ToolDeclaration;
use realtime_car_demo::session::LogCategory;
use realtime_car_demo::vehicle::Lights;
use realtime_car_demo::{
    ConnectionSettings, SessionConfig, SessionController, SessionError, SessionNotification,
    SessionState, VehicleStore,
};

fn controller(script: &Script) -> (SessionController, Receiver<SessionNotification>) {
    SessionController::new(script.transport(), VehicleStore::default())
}

fn connected(script: &Script) -> (SessionController, Receiver<SessionNotification>) {
    let (mut session, rx) = controller(script);
    session.connect(&settings(), &SessionConfig::default()).unwrap();
    (session, rx)
}

fn drain(rx: &Receiver<SessionNotification>) -> Vec<SessionNotification> {
    rx.try_iter()
        .filter(|n| !matches!(n, SessionNotification::Event(_)))
        .collect()
}

fn function_call(call_id: &str, name: &str, arguments: &str) -> serde_json::Value {
    json!({
        "type": "response.function_call_arguments.done",
        "call_id": call_id,
        "name": name,
        "arguments": arguments
    })
}

/// Feed every scripted inbound event through the controller
fn pump(session: &mut SessionController) {
    while session.poll() {}
}

// ============================================================================
// CONNECT / DISCONNECT
// ============================================================================

#[test]
fn empty_endpoint_or_key_is_a_configuration_error() {
    let script = Script::new();
    let (mut session, rx) = controller(&script);

    for settings in [
        ConnectionSettings::new("", "key"),
        ConnectionSettings::new("wss://realtime.example.com", "  "),
    ] {
        let err = session
            .connect(&settings, &SessionConfig::default())
            .unwrap_err();
        assert!(matches!(err, SessionError::Configuration(_)));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    assert_eq!(script.opens(), 0);
    let notes = drain(&rx);
    assert_eq!(notes.len(), 2);
    assert!(notes
        .iter()
        .all(|n| matches!(n, SessionNotification::Error(_))));
    assert_eq!(session.audit().count(LogCategory::Error), 2);
}

#[test]
fn connect_sends_session_update_with_tools() {
    let script = Script::new();
    let (session, rx) = connected(&script);

    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(drain(&rx), vec![SessionNotification::Open]);

    let sent = script.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "session.update");
    let declared: Vec<&str> = sent[0]["session"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    let config = SessionConfig::default();
    let expected: Vec<&str> = config.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(declared, expected);
    assert!(declared.contains(&"setLights"));
    assert_eq!(session.active_config(), Some(&SessionConfig::default()));
}

#[test]
fn undeclarable_tool_is_rejected_before_opening() {
    let script = Script::new();
    let (mut session, _rx) = controller(&script);

    let mut config = SessionConfig::default();
    config.tools.push(ToolDeclaration {
        name: "openSunroof".into(),
        description: "not implemented".into(),
        parameters: json!({"type": "object"}),
    });

    let err = session.connect(&settings(), &config).unwrap_err();
    assert!(matches!(err, SessionError::Configuration(_)));
    assert_eq!(script.opens(), 0);
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
fn incomplete_tool_list_is_rejected_before_opening() {
    let script = Script::new();
    let (mut session, _rx) = controller(&script);

    let mut empty = SessionConfig::default();
    empty.tools.clear();
    let mut partial = SessionConfig::default();
    partial.tools.retain(|t| t.name != "setLights");

    for config in [empty, partial] {
        let err = session.connect(&settings(), &config).unwrap_err();
        assert!(matches!(err, SessionError::Configuration(_)));
        assert_eq!(session.state(), SessionState::Disconnected);
    }
    assert_eq!(script.opens(), 0);
}

#[test]
fn edited_tool_schema_is_rejected_but_descriptions_may_change() {
    let script = Script::new();
    let (mut session, _rx) = controller(&script);

    let mut loose = SessionConfig::default();
    let volume = loose.tools.iter_mut().find(|t| t.name == "setVolume").unwrap();
    volume.parameters = json!({"type": "object", "properties": {}});
    let err = session.connect(&settings(), &loose).unwrap_err();
    assert!(matches!(err, SessionError::Configuration(_)));
    assert_eq!(script.opens(), 0);

    let mut reworded = SessionConfig::default();
    reworded.tools[0].description = "Headlights.".into();
    session.connect(&settings(), &reworded).unwrap();
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn open_timeout_leaves_session_disconnected() {
    let script = Script::new();
    script.fail_next_open(SessionError::ConnectionTimeout(Duration::from_secs(10)));
    let (mut session, rx) = controller(&script);

    let err = session
        .connect(&settings(), &SessionConfig::default())
        .unwrap_err();
    assert_eq!(err, SessionError::ConnectionTimeout(Duration::from_secs(10)));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(matches!(drain(&rx).as_slice(), [SessionNotification::Error(_)]));

    // a fresh connect works afterwards
    session.connect(&settings(), &SessionConfig::default()).unwrap();
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn disconnect_is_idempotent() {
    let script = Script::new();
    let (mut session, rx) = connected(&script);
    drain(&rx);

    session.disconnect();
    let once = session.state();
    session.disconnect();

    assert_eq!(once, SessionState::Disconnected);
    assert_eq!(session.state(), once);
    assert_eq!(script.closes(), 1);
    assert_eq!(drain(&rx), vec![SessionNotification::Closed]);
    assert_eq!(session.audit().count(LogCategory::Error), 0);
}

#[test]
fn channel_failure_forces_disconnect() {
    let script = Script::new();
    let (mut session, rx) = connected(&script);
    drain(&rx);

    script.push_failure(SessionError::Channel("connection reset".into()));
    assert!(session.poll());

    assert_eq!(session.state(), SessionState::Disconnected);
    let notes = drain(&rx);
    assert!(matches!(notes[0], SessionNotification::Error(_)));
    assert_eq!(notes[1], SessionNotification::Closed);
    assert!(!session.poll());
}

// ============================================================================
// TOOL CALLS
// ============================================================================

#[test]
fn function_call_updates_vehicle_and_returns_result() {
    let script = Script::new();
    let (mut session, _rx) = connected(&script);

    script.push_event(function_call("call_42", "setLights", r#"{"state":"on"}"#));
    pump(&mut session);

    assert_eq!(session.vehicle().snapshot().lights, Lights::On);

    let outputs = script.tool_outputs();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0]["call_id"], "call_42");
    let payload: serde_json::Value =
        serde_json::from_str(outputs[0]["output"].as_str().unwrap()).unwrap();
    assert_eq!(payload, json!({"status": "ok", "field": "lights", "value": "on"}));

    // the result is followed by a request to continue the response
    let sent = script.sent();
    assert_eq!(sent.last().unwrap()["type"], "response.create");
    assert_eq!(session.audit().count(LogCategory::Tool), 1);
}

#[test]
fn malformed_arguments_return_error_result() {
    let script = Script::new();
    let (mut session, _rx) = connected(&script);
    let before = session.vehicle().snapshot();

    script.push_event(function_call("call_1", "setVolume", "{level: 40"));
    pump(&mut session);

    let outputs = script.tool_outputs();
    assert_eq!(outputs.len(), 1);
    let payload: serde_json::Value =
        serde_json::from_str(outputs[0]["output"].as_str().unwrap()).unwrap();
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["error"], "argument_parse");
    assert_eq!(session.vehicle().snapshot(), before);
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn unknown_and_invalid_calls_leave_state_unchanged() {
    let script = Script::new();
    let (mut session, _rx) = connected(&script);
    let before = session.vehicle().snapshot();

    script.push_event(function_call("call_1", "openSunroof", "{}"));
    script.push_event(function_call("call_2", "setVolume", r#"{"level": 400}"#));
    pump(&mut session);

    let outputs = script.tool_outputs();
    assert_eq!(outputs.len(), 2);
    let kinds: Vec<String> = outputs
        .iter()
        .map(|o| {
            let payload: serde_json::Value =
                serde_json::from_str(o["output"].as_str().unwrap()).unwrap();
            payload["error"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(kinds, vec!["unknown_tool", "invalid_argument"]);
    assert_eq!(session.vehicle().snapshot(), before);
}

#[test]
fn call_without_usable_name_still_gets_a_result() {
    let script = Script::new();
    let (mut session, _rx) = connected(&script);
    let before = session.vehicle().snapshot();

    script.push_event(json!({
        "type": "response.function_call_arguments.done",
        "call_id": "call_x",
        "arguments": "{}"
    }));
    script.push_event(json!({
        "type": "response.function_call_arguments.done",
        "call_id": "call_y",
        "name": 42,
        "arguments": "{}"
    }));
    pump(&mut session);

    let outputs = script.tool_outputs();
    let answered: Vec<(&str, String)> = outputs
        .iter()
        .map(|o| {
            let payload: serde_json::Value =
                serde_json::from_str(o["output"].as_str().unwrap()).unwrap();
            (
                o["call_id"].as_str().unwrap(),
                payload["error"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        answered,
        vec![
            ("call_x", "unknown_tool".to_string()),
            ("call_y", "argument_parse".to_string())
        ]
    );
    assert_eq!(session.vehicle().snapshot(), before);
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn disconnected_controller_ignores_inbound_calls() {
    let script = Script::new();
    let (mut session, _rx) = controller(&script);
    let before = session.vehicle().snapshot();

    session.handle_inbound_event(
        &function_call("call_1", "setLights", r#"{"state":"on"}"#).to_string(),
    );

    assert_eq!(session.vehicle().snapshot(), before);
    assert!(script.sent().is_empty());
    assert!(session.audit().entries().is_empty());
}

#[test]
fn repeated_call_id_is_dispatched_once() {
    let script = Script::new();
    let (mut session, _rx) = connected(&script);

    script.push_event(function_call("call_7", "setVolume", r#"{"level": 10}"#));
    script.push_event(function_call("call_7", "setVolume", r#"{"level": 90}"#));
    pump(&mut session);

    assert_eq!(script.tool_outputs().len(), 1);
    assert_eq!(session.vehicle().snapshot().volume, 10);
}

#[test]
fn failed_result_send_ends_the_session() {
    let script = Script::new();
    let (mut session, rx) = connected(&script);
    drain(&rx);

    script.fail_sends(true);
    script.push_event(function_call("call_1", "setLights", r#"{"state":"auto"}"#));
    pump(&mut session);

    assert_eq!(session.vehicle().snapshot().lights, Lights::Auto);
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(script.closes(), 1);
    assert!(matches!(
        drain(&rx).as_slice(),
        [SessionNotification::Error(_), SessionNotification::Closed]
    ));
    assert!(session
        .audit()
        .entries()
        .iter()
        .any(|e| e.category == LogCategory::Error && e.message.contains("call_1")));
}

#[test]
fn tool_result_needs_an_open_channel() {
    let script = Script::new();
    let (mut session, _rx) = controller(&script);
    let result = realtime_car_demo::tools::ToolCallResult {
        call_id: "call_1".into(),
        success: true,
        payload: json!({"status": "ok"}),
    };
    assert_eq!(
        session.send_tool_result(&result).unwrap_err(),
        SessionError::ChannelClosed
    );
    assert_eq!(
        session.send_user_text("hello").unwrap_err(),
        SessionError::ChannelClosed
    );
}

// ============================================================================
// TELEMETRY / OTHER EVENTS
// ============================================================================

#[test]
fn response_done_feeds_metrics() {
    let script = Script::new();
    let (mut session, _rx) = connected(&script);

    script.push_event(json!({
        "type": "response.done",
        "latency": 420,
        "response": {
            "usage": {
                "input_tokens": { "text": 100, "audio": 50 },
                "output_tokens": { "text": 20, "audio": 80 },
                "cache_read_input_tokens": 30,
                "total_tokens": 250
            }
        }
    }));
    script.push_event(json!({
        "type": "response.done",
        "response": { "usage": { "total_tokens": 10 } }
    }));
    // no usage and no latency: not a completed turn
    script.push_event(json!({ "type": "response.done", "response": {} }));
    pump(&mut session);

    let metrics = session.metrics();
    assert_eq!(metrics.turns, 2);
    assert_eq!(metrics.input_text_tokens, 100);
    assert_eq!(metrics.input_audio_tokens, 50);
    assert_eq!(metrics.output_audio_tokens, 80);
    assert_eq!(metrics.cached_tokens, 30);
    assert_eq!(metrics.total_tokens, 260);
    assert_eq!(metrics.latencies_ms, vec![420]);
    assert_eq!(metrics.latency.p90, 420);
}

#[test]
fn unrecognised_and_garbage_events_are_harmless() {
    let script = Script::new();
    let (mut session, rx) = connected(&script);
    drain(&rx);

    script.push_event(json!({ "type": "response.audio.delta", "delta": "AAAA" }));
    script.push_event(json!({ "no_type": true }));
    script.push_raw("definitely not json");
    pump(&mut session);

    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.metrics().turns, 0);
    assert_eq!(script.tool_outputs().len(), 0);
    assert!(drain(&rx).is_empty());
    assert_eq!(session.audit().count(LogCategory::Error), 1);
}

#[test]
fn server_error_is_annotated_without_disconnecting() {
    let script = Script::new();
    let (mut session, rx) = connected(&script);
    drain(&rx);

    script.push_event(json!({
        "type": "error",
        "error": { "type": "invalid_request_error", "message": "Unknown parameter" }
    }));
    pump(&mut session);

    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(
        drain(&rx),
        vec![SessionNotification::Error("Unknown parameter".into())]
    );
}

#[test]
fn user_text_is_sent_as_message_and_response_request() {
    let script = Script::new();
    let (mut session, _rx) = connected(&script);

    session.send_user_text("turn on the lights").unwrap();

    let items = script.sent_of_type("conversation.item.create");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["item"]["content"][0]["text"], "turn on the lights");
    assert_eq!(script.sent_of_type("response.create").len(), 1);
}
