//! In-memory device for demos and tests.
//!
//! Clones share state, so a test can keep one clone as a probe while the
//! engine owns another.

use crate::driver::{DeviceConfig, DeviceDriver, DriverError};
use crate::lock;
use crate::snapshot::ProcessSnapshot;
use crate::tags;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct MockState {
    connect_error: Option<DriverError>,
    write_error: Option<DriverError>,
    reads_before_failure: Option<u32>,
    reading: ProcessSnapshot,
    connected: bool,
    connects: u32,
    disconnects: u32,
    reads: u32,
    writes: Vec<(String, bool)>,
}

#[derive(Clone, Debug, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    /// A reachable device reporting the default snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// A device whose every connect attempt is refused.
    pub fn refusing(message: impl Into<String>) -> Self {
        let driver = Self::new();
        lock(&driver.state).connect_error = Some(DriverError::Refused {
            message: message.into(),
        });
        driver
    }

    pub fn with_reading(self, reading: ProcessSnapshot) -> Self {
        self.set_reading(reading);
        self
    }

    /// Reads succeed `reads` times per session, then fail with a transport error.
    pub fn fail_reads_after(self, reads: u32) -> Self {
        lock(&self.state).reads_before_failure = Some(reads);
        self
    }

    pub fn fail_writes(self, error: DriverError) -> Self {
        lock(&self.state).write_error = Some(error);
        self
    }

    pub fn set_reading(&self, reading: ProcessSnapshot) {
        lock(&self.state).reading = reading;
    }

    /// Fail every read from now on, as if the cable were pulled.
    pub fn break_link(&self) {
        lock(&self.state).reads_before_failure = Some(0);
    }

    pub fn restore_link(&self) {
        lock(&self.state).reads_before_failure = None;
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    pub fn connects(&self) -> u32 {
        lock(&self.state).connects
    }

    pub fn disconnects(&self) -> u32 {
        lock(&self.state).disconnects
    }

    pub fn reads(&self) -> u32 {
        lock(&self.state).reads
    }

    pub fn writes(&self) -> Vec<(String, bool)> {
        lock(&self.state).writes.clone()
    }
}

impl DeviceDriver for MockDriver {
    fn connect(&mut self, _config: &DeviceConfig) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        state.connects += 1;
        if let Some(err) = state.connect_error.clone() {
            return Err(err);
        }
        state.connected = true;
        state.reads = 0;
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = lock(&self.state);
        if state.connected {
            state.connected = false;
            state.disconnects += 1;
        }
    }

    fn read_all(&mut self) -> Result<ProcessSnapshot, DriverError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(DriverError::NotConnected);
        }
        if state.reads_before_failure.is_some_and(|limit| state.reads >= limit) {
            state.connected = false;
            return Err(DriverError::Transport {
                message: "link down".to_string(),
            });
        }
        state.reads += 1;
        Ok(state.reading)
    }

    fn write_bit(&mut self, name: &str, value: bool) -> Result<(), DriverError> {
        let tag = tags::lookup(name)
            .filter(|tag| tag.is_writable())
            .ok_or_else(|| DriverError::UnknownTag {
                name: name.to_string(),
            })?;
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(DriverError::NotConnected);
        }
        if let Some(err) = state.write_error.clone() {
            return Err(err);
        }
        state.writes.push((tag.key.to_string(), value));
        if tag.key == tags::SYSTEM_RUNNING.key {
            state.reading.set_running(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusing_driver_never_connects() {
        let mut driver = MockDriver::refusing("no route");
        let err = driver.connect(&DeviceConfig::new("10.0.0.1")).unwrap_err();
        assert_eq!(
            err,
            DriverError::Refused {
                message: "no route".into()
            }
        );
        assert!(!driver.is_connected());
        assert_eq!(driver.connects(), 1);
    }

    #[test]
    fn reads_fail_after_limit() {
        let mut driver = MockDriver::new().fail_reads_after(2);
        driver.connect(&DeviceConfig::new("10.0.0.1")).unwrap();
        assert!(driver.read_all().is_ok());
        assert!(driver.read_all().is_ok());
        assert!(matches!(driver.read_all(), Err(DriverError::Transport { .. })));
        assert!(!driver.is_connected());
    }

    #[test]
    fn running_coil_write_is_reflected_in_reading() {
        let mut driver = MockDriver::new();
        let probe = driver.clone();
        driver.connect(&DeviceConfig::new("10.0.0.1")).unwrap();
        driver.write_bit("system_running", true).unwrap();
        assert!(driver.read_all().unwrap().is_running());
        assert_eq!(probe.writes(), vec![("system_running".to_string(), true)]);
    }

    #[test]
    fn register_tags_are_not_writable() {
        let mut driver = MockDriver::new();
        driver.connect(&DeviceConfig::new("10.0.0.1")).unwrap();
        assert!(matches!(
            driver.write_bit("motor_speed_rpm", true),
            Err(DriverError::UnknownTag { .. })
        ));
    }
}
