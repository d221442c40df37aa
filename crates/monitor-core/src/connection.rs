//! Single source of truth for device reachability.
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──ok──► Connected
//!                                 │                  │ read error
//!                                 └──err──► SimulationFallback ◄┘
//! any ──disconnect()──► Disconnected
//! ```
//!
//! Reconnection is always caller-initiated. Events are queued in an outbox
//! and drained with [`ConnectionManager::take_events`], so the owner can
//! publish them after releasing its own locks.

use crate::driver::{DeviceConfig, DeviceDriver, DriverError};
use crate::event::{ConnectionState, StatusEvent};
use crate::simulation::Simulator;
use crate::snapshot::ProcessSnapshot;
use log::{debug, info, warn};

pub struct ConnectionManager<D: DeviceDriver> {
    driver: D,
    simulator: Simulator,
    state: ConnectionState,
    status: String,
    outbox: Vec<StatusEvent>,
}

impl<D: DeviceDriver> ConnectionManager<D> {
    pub fn new(driver: D) -> Self {
        Self::with_simulator(driver, Simulator::new())
    }

    pub fn with_simulator(driver: D, simulator: Simulator) -> Self {
        Self {
            driver,
            simulator,
            state: ConnectionState::Disconnected,
            status: "Disconnected".to_string(),
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn is_simulating(&self) -> bool {
        self.state.is_simulating()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Try to open a device session. Failure is reported through state and
    /// a `ConnectionChanged` event, never as an error.
    pub fn connect(&mut self, config: &DeviceConfig) -> bool {
        if self.state.is_connected() {
            debug!("connect requested while already connected to {}", config.address);
            return true;
        }

        self.state = ConnectionState::Connecting;
        self.status = format!("Connecting to {}", config.address);
        info!("{}", self.status);

        match config.validate().and_then(|()| self.driver.connect(config)) {
            Ok(()) => {
                self.transition(
                    ConnectionState::Connected,
                    format!(
                        "Connected to PLC at {} (unit {})",
                        config.address, config.device_id
                    ),
                );
                true
            }
            Err(err) => {
                self.driver.disconnect();
                self.transition(
                    ConnectionState::SimulationFallback,
                    format!(
                        "Connection to `{}` failed: {err}; running in simulation mode",
                        config.address
                    ),
                );
                false
            }
        }
    }

    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            debug!("disconnect requested while already disconnected");
            return;
        }
        if self.state.is_connected() {
            self.driver.disconnect();
        }
        self.transition(ConnectionState::Disconnected, "Disconnected".to_string());
    }

    /// Forward a control bit to the device. Only a connected device is
    /// written; a simulated plant takes its run flag from the snapshot.
    pub fn write_setpoint(&mut self, name: &str, value: bool) -> Result<(), DriverError> {
        if !self.state.is_connected() {
            debug!("write of `{name}` skipped: {}", self.state);
            return Err(DriverError::NotConnected);
        }
        self.driver.write_bit(name, value).inspect_err(|err| {
            warn!("write of `{name}` = {value} failed: {err}");
        })
    }

    /// Fresh data for this tick: a device reading when connected, otherwise
    /// (or when the read fails) a simulated step from `previous`.
    pub fn read_snapshot(&mut self, previous: &ProcessSnapshot) -> ProcessSnapshot {
        if self.state.is_connected() {
            match self.driver.read_all() {
                Ok(snapshot) => return snapshot,
                Err(err) => {
                    warn!("device read failed: {err}");
                    self.driver.disconnect();
                    self.transition(
                        ConnectionState::SimulationFallback,
                        format!("PLC connection lost ({err}); switched to simulation"),
                    );
                }
            }
        }
        self.simulator.step(previous)
    }

    pub fn take_events(&mut self) -> Vec<StatusEvent> {
        std::mem::take(&mut self.outbox)
    }

    fn transition(&mut self, state: ConnectionState, message: String) {
        let previous = std::mem::replace(&mut self.state, state);
        info!("connection {previous} -> {state}: {message}");
        self.outbox
            .push(StatusEvent::connection_changed(state, message.as_str()));
        self.status = message;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;

    fn config() -> DeviceConfig {
        DeviceConfig::new("192.168.0.10:502")
    }

    fn manager(driver: MockDriver) -> ConnectionManager<MockDriver> {
        ConnectionManager::with_simulator(driver, Simulator::seeded(1))
    }

    fn states(events: &[StatusEvent]) -> Vec<ConnectionState> {
        events
            .iter()
            .filter_map(|event| match event {
                StatusEvent::ConnectionChanged { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn successful_connect_clears_simulation() {
        let mut mgr = manager(MockDriver::new());
        assert!(mgr.is_simulating());
        assert!(mgr.connect(&config()));
        assert_eq!(mgr.state(), ConnectionState::Connected);
        assert!(!mgr.is_simulating());
        assert!(mgr.status().contains("192.168.0.10:502"));
        assert_eq!(states(&mgr.take_events()), vec![ConnectionState::Connected]);
    }

    #[test]
    fn failed_connect_falls_back_to_simulation() {
        let mut mgr = manager(MockDriver::refusing("no route to host"));
        assert!(!mgr.connect(&config()));
        assert_eq!(mgr.state(), ConnectionState::SimulationFallback);
        assert!(mgr.is_simulating());
        assert!(mgr.status().contains("no route to host"));

        let events = mgr.take_events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            StatusEvent::ConnectionChanged {
                connected,
                simulating,
                message,
                ..
            } => {
                assert!(!connected);
                assert!(simulating);
                assert!(message.contains("simulation"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn invalid_config_never_reaches_driver() {
        let driver = MockDriver::new();
        let probe = driver.clone();
        let mut mgr = manager(driver);
        assert!(!mgr.connect(&DeviceConfig::default()));
        assert_eq!(mgr.state(), ConnectionState::SimulationFallback);
        assert_eq!(probe.connects(), 0);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let driver = MockDriver::new();
        let probe = driver.clone();
        let mut mgr = manager(driver);
        mgr.connect(&config());
        mgr.take_events();

        mgr.disconnect();
        mgr.disconnect();
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert_eq!(probe.disconnects(), 1);
        assert_eq!(states(&mgr.take_events()), vec![ConnectionState::Disconnected]);
    }

    #[test]
    fn disconnect_then_failing_connect_never_sticks_in_connecting() {
        let mut mgr = manager(MockDriver::refusing("timeout"));
        for _ in 0..3 {
            mgr.disconnect();
            mgr.connect(&config());
            assert_eq!(mgr.state(), ConnectionState::SimulationFallback);
        }
    }

    #[test]
    fn read_failure_falls_back_exactly_once() {
        let driver = MockDriver::new().fail_reads_after(1);
        let probe = driver.clone();
        let mut mgr = manager(driver);
        mgr.connect(&config());
        mgr.take_events();

        let previous = ProcessSnapshot::default();
        mgr.read_snapshot(&previous);
        assert_eq!(mgr.state(), ConnectionState::Connected);

        let simulated = mgr.read_snapshot(&previous);
        assert_eq!(simulated.motor_speed(), previous.motor_speed() - 50);
        mgr.read_snapshot(&simulated);

        assert_eq!(mgr.state(), ConnectionState::SimulationFallback);
        assert_eq!(
            states(&mgr.take_events()),
            vec![ConnectionState::SimulationFallback]
        );
        assert_eq!(probe.reads(), 1);
    }

    #[test]
    fn connected_reads_come_from_device() {
        let reading = ProcessSnapshot::new(12.5, 61.0, 4.2, 1800, true);
        let mut mgr = manager(MockDriver::new().with_reading(reading));
        mgr.connect(&config());
        assert_eq!(mgr.read_snapshot(&ProcessSnapshot::default()), reading);
    }

    #[test]
    fn writes_require_connection() {
        let driver = MockDriver::new();
        let probe = driver.clone();
        let mut mgr = manager(driver);
        assert_eq!(
            mgr.write_setpoint("system_running", true),
            Err(DriverError::NotConnected)
        );
        mgr.connect(&config());
        assert!(mgr.write_setpoint("system_running", true).is_ok());
        assert_eq!(probe.writes().len(), 1);
    }

    #[test]
    fn failed_write_keeps_connection() {
        let driver = MockDriver::new().fail_writes(DriverError::Timeout { timeout_ms: 200 });
        let mut mgr = manager(driver);
        mgr.connect(&config());
        mgr.take_events();
        assert!(mgr.write_setpoint("system_running", true).is_err());
        assert_eq!(mgr.state(), ConnectionState::Connected);
        assert!(mgr.take_events().is_empty());
    }

    #[test]
    fn reconnect_after_fallback() {
        let driver = MockDriver::new().fail_reads_after(0);
        let probe = driver.clone();
        let mut mgr = manager(driver);
        mgr.connect(&config());
        mgr.read_snapshot(&ProcessSnapshot::default());
        assert_eq!(mgr.state(), ConnectionState::SimulationFallback);

        assert!(mgr.connect(&config()));
        assert_eq!(mgr.state(), ConnectionState::Connected);
        assert_eq!(probe.connects(), 2);
    }
}
