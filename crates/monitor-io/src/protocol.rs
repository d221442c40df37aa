use monitor_core::{ConnectionState, ProcessSnapshot, StatusEvent};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn v1() -> Self {
        Self { major: 1, minor: 0 }
    }

    pub fn is_supported(&self) -> bool {
        self.major == 1
    }
}

pub fn unix_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros() as u64)
        .unwrap_or(0)
}

/// A status-bus event forwarded to the client.
#[derive(Debug, Serialize)]
pub struct EventMsg<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub protocol_version: ProtocolVersion,
    pub sequence: u64,
    pub unix_us: u64,
    #[serde(flatten)]
    pub event: &'a StatusEvent,
}

impl<'a> EventMsg<'a> {
    pub fn new(sequence: u64, event: &'a StatusEvent) -> Self {
        Self {
            msg_type: "event",
            protocol_version: ProtocolVersion::v1(),
            sequence,
            unix_us: unix_us(),
            event,
        }
    }
}

/// Full engine status, sent on client connect and on request.
#[derive(Debug, Serialize)]
pub struct StatusMsg {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub protocol_version: ProtocolVersion,
    pub sequence: u64,
    pub unix_us: u64,
    pub state: ConnectionState,
    pub connected: bool,
    pub simulating: bool,
    pub message: String,
    pub snapshot: ProcessSnapshot,
}

impl StatusMsg {
    pub fn new(
        sequence: u64,
        state: ConnectionState,
        message: String,
        snapshot: ProcessSnapshot,
    ) -> Self {
        Self {
            msg_type: "status",
            protocol_version: ProtocolVersion::v1(),
            sequence,
            unix_us: unix_us(),
            state,
            connected: state.is_connected(),
            simulating: state.is_simulating(),
            message,
            snapshot,
        }
    }
}

/// Reply to one command. `sequence` echoes the command's sequence.
#[derive(Debug, Serialize)]
pub struct AckMsg {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub protocol_version: ProtocolVersion,
    pub sequence: u64,
    pub command: &'static str,
    pub ok: bool,
    pub message: String,
}

impl AckMsg {
    pub fn new(sequence: u64, command: &Command, ok: bool, message: impl Into<String>) -> Self {
        Self {
            msg_type: "ack",
            protocol_version: ProtocolVersion::v1(),
            sequence,
            command: command.name(),
            ok,
            message: message.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HelloMsg {
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Clients that omit the version speak v1.
    #[serde(default = "ProtocolVersion::v1")]
    pub protocol_version: ProtocolVersion,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Connect,
    Disconnect,
    Status,
    SetRunning { running: bool },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect => "connect",
            Command::Disconnect => "disconnect",
            Command::Status => "status",
            Command::SetRunning { .. } => "set_running",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CommandMsg {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default = "ProtocolVersion::v1")]
    pub protocol_version: ProtocolVersion,
    #[serde(default)]
    pub sequence: u64,
    #[serde(flatten)]
    pub command: Command,
}

#[derive(Debug)]
pub enum IncomingMessage {
    Hello(HelloMsg),
    Command(CommandMsg),
}

impl IncomingMessage {
    pub fn parse(line: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(line).ok()?;
        let msg_type = value.get("type")?.as_str()?;
        match msg_type {
            "command" => serde_json::from_value(value)
                .ok()
                .map(IncomingMessage::Command),
            "hello" => serde_json::from_value(value)
                .ok()
                .map(IncomingMessage::Hello),
            _ => None,
        }
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        match self {
            IncomingMessage::Hello(hello) => hello.protocol_version,
            IncomingMessage::Command(command) => command.protocol_version,
        }
    }
}
