use crate::snapshot::ProcessSnapshot;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    SimulationFallback,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::SimulationFallback => "simulation_fallback",
        }
    }

    /// Stable numeric code, used for gauges.
    pub fn code(&self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::SimulationFallback => 3,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Data comes from the simulator in every state but `Connected`.
    pub fn is_simulating(&self) -> bool {
        !self.is_connected()
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionChanged,
    DataUpdated,
}

/// Notification carried by the [`StatusBus`](crate::bus::StatusBus).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    ConnectionChanged {
        state: ConnectionState,
        connected: bool,
        simulating: bool,
        message: String,
    },
    DataUpdated {
        snapshot: ProcessSnapshot,
    },
}

impl StatusEvent {
    pub fn connection_changed(state: ConnectionState, message: impl Into<String>) -> Self {
        Self::ConnectionChanged {
            state,
            connected: state.is_connected(),
            simulating: state.is_simulating(),
            message: message.into(),
        }
    }

    pub fn data_updated(snapshot: ProcessSnapshot) -> Self {
        Self::DataUpdated { snapshot }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::ConnectionChanged { .. } => EventKind::ConnectionChanged,
            Self::DataUpdated { .. } => EventKind::DataUpdated,
        }
    }
}
