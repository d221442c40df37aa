//! JSONL audit trail of connection changes and process lifecycle.

use monitor_core::{ConnectionState, EventKind, StatusBus, StatusEvent, Subscription};
use monitor_io::protocol::unix_us;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Types of events that are logged in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    SystemStart,
    SystemShutdown,
    /// PLC session opened
    ConnectionEstablished,
    /// Connect failed or the link was lost; data is simulated
    SimulationFallback,
    /// Session closed on request
    Disconnected,
}

impl AuditEventType {
    pub fn for_state(state: ConnectionState) -> Option<Self> {
        match state {
            ConnectionState::Connected => Some(Self::ConnectionEstablished),
            ConnectionState::SimulationFallback => Some(Self::SimulationFallback),
            ConnectionState::Disconnected => Some(Self::Disconnected),
            ConnectionState::Connecting => None,
        }
    }
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Wall-clock Unix timestamp in microseconds
    pub unix_us: u64,
    pub event_type: AuditEventType,
    /// Additional event-specific details
    pub details: serde_json::Value,
}

/// Thread-safe audit logger that writes to a JSONL file
pub struct AuditLogger {
    writer: Mutex<BufWriter<File>>,
}

impl AuditLogger {
    /// Create a new audit logger writing to the specified path.
    /// The file is opened in append mode to preserve existing logs.
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::with_capacity(8192, file)),
        })
    }

    /// Log an audit entry. This is thread-safe and can be called from any thread.
    pub fn log(&self, entry: &AuditEntry) -> io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "audit writer lock poisoned"))?;
        serde_json::to_writer(&mut *writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    pub fn log_event(&self, event_type: AuditEventType, details: serde_json::Value) -> io::Result<()> {
        self.log(&AuditEntry {
            unix_us: unix_us(),
            event_type,
            details,
        })
    }

    /// Record every connection change published on `bus`. A failed write
    /// surfaces as a handler failure on the bus.
    pub fn attach(self: &Arc<Self>, bus: &StatusBus) -> Subscription {
        let logger = Arc::clone(self);
        bus.subscribe(EventKind::ConnectionChanged, move |event| {
            if let StatusEvent::ConnectionChanged { state, message, .. } = event {
                if let Some(event_type) = AuditEventType::for_state(*state) {
                    logger.log_event(
                        event_type,
                        serde_json::json!({ "state": state, "message": message }),
                    )?;
                }
            }
            Ok(())
        })
    }
}
