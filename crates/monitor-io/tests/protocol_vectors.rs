use monitor_core::{ConnectionState, ProcessSnapshot, StatusEvent};
use monitor_io::protocol::{AckMsg, Command, EventMsg, IncomingMessage, ProtocolVersion, StatusMsg};
use serde_json::Value;

#[test]
fn parses_hello_message() {
    let raw = r#"{
        "type":"hello",
        "protocol_version":{"major":1,"minor":0},
        "client_id":"hmi-panel"
    }"#;

    let msg = IncomingMessage::parse(raw).expect("hello should parse");
    match msg {
        IncomingMessage::Hello(hello) => {
            assert!(hello.protocol_version.is_supported());
            assert_eq!(hello.client_id.as_deref(), Some("hmi-panel"));
        }
        _ => panic!("expected hello message"),
    }
}

#[test]
fn parses_command_messages() {
    let raw = r#"{"type":"command","protocol_version":{"major":1,"minor":0},"sequence":7,"command":"connect"}"#;
    match IncomingMessage::parse(raw).expect("connect should parse") {
        IncomingMessage::Command(cmd) => {
            assert_eq!(cmd.sequence, 7);
            assert_eq!(cmd.command, Command::Connect);
            assert_eq!(cmd.protocol_version, ProtocolVersion::v1());
        }
        _ => panic!("expected command message"),
    }

    let raw = r#"{"type":"command","command":"set_running","running":true}"#;
    match IncomingMessage::parse(raw).expect("set_running should parse") {
        IncomingMessage::Command(cmd) => {
            assert_eq!(cmd.sequence, 0);
            assert_eq!(cmd.command, Command::SetRunning { running: true });
            assert_eq!(cmd.command.name(), "set_running");
        }
        _ => panic!("expected command message"),
    }
}

#[test]
fn missing_version_means_v1() {
    let msg = IncomingMessage::parse(r#"{"type":"command","sequence":5,"command":"connect"}"#)
        .expect("version-less command should parse");
    assert_eq!(msg.protocol_version(), ProtocolVersion::v1());
    assert!(msg.protocol_version().is_supported());

    let msg = IncomingMessage::parse(r#"{"type":"hello","client_id":"hmi"}"#)
        .expect("version-less hello should parse");
    assert!(msg.protocol_version().is_supported());

    let msg = IncomingMessage::parse(
        r#"{"type":"command","protocol_version":{"major":2,"minor":0},"command":"status"}"#,
    )
    .expect("v2 command should parse");
    assert!(!msg.protocol_version().is_supported());
}

#[test]
fn rejects_unknown_and_malformed_lines() {
    assert!(IncomingMessage::parse("not json").is_none());
    assert!(IncomingMessage::parse(r#"{"type":"recommendation"}"#).is_none());
    assert!(IncomingMessage::parse(r#"{"type":"command","command":"reboot"}"#).is_none());
    assert!(IncomingMessage::parse(r#"{"type":"command","command":"set_running"}"#).is_none());
}

#[test]
fn event_envelope_carries_event_fields() {
    let event = StatusEvent::data_updated(ProcessSnapshot::default());
    let line = serde_json::to_string(&EventMsg::new(3, &event)).unwrap();
    let value: Value = serde_json::from_str(&line).unwrap();

    assert_eq!(value["type"], "event");
    assert_eq!(value["sequence"], 3);
    assert_eq!(value["event"], "data_updated");
    assert_eq!(value["snapshot"]["motor_speed_rpm"], 1450);
    assert_eq!(value["snapshot"]["running"], false);

    let event = StatusEvent::connection_changed(ConnectionState::SimulationFallback, "refused");
    let value: Value = serde_json::to_value(EventMsg::new(4, &event)).unwrap();
    assert_eq!(value["event"], "connection_changed");
    assert_eq!(value["state"], "simulation_fallback");
    assert_eq!(value["simulating"], true);
    assert_eq!(value["message"], "refused");
}

#[test]
fn status_and_ack_shapes() {
    let status = StatusMsg::new(
        1,
        ConnectionState::Connected,
        "Connected".to_string(),
        ProcessSnapshot::default(),
    );
    let value: Value = serde_json::to_value(status).unwrap();
    assert_eq!(value["type"], "status");
    assert_eq!(value["connected"], true);
    assert_eq!(value["simulating"], false);
    assert_eq!(value["snapshot"]["tank_level_pct"], 65.0);

    let ack = AckMsg::new(9, &Command::Disconnect, true, "Disconnected");
    let value: Value = serde_json::to_value(ack).unwrap();
    assert_eq!(value["type"], "ack");
    assert_eq!(value["sequence"], 9);
    assert_eq!(value["command"], "disconnect");
    assert_eq!(value["ok"], true);
}
