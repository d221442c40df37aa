pub mod bridge;
pub mod hal_modbus;
pub mod metrics;
pub mod protocol;

pub use bridge::{run_bridge, BridgeConfig, BridgeServer};
pub use hal_modbus::ModbusDriver;
pub use metrics::{init_metrics, record_event, serve_metrics};
pub use protocol::{Command, IncomingMessage, ProtocolVersion};
