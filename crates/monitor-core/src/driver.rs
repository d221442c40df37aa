use crate::snapshot::ProcessSnapshot;
use std::time::Duration;
use thiserror::Error;

/// Where and how to reach the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub address: String,
    pub device_id: u8,
    /// Upper bound for any single device call.
    pub io_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            device_id: 1,
            io_timeout: Duration::from_millis(200),
        }
    }
}

impl DeviceConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn with_device_id(mut self, device_id: u8) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        if self.address.trim().is_empty() {
            return Err(DriverError::InvalidConfig {
                message: "no device address configured".to_string(),
            });
        }
        if self.io_timeout.is_zero() {
            return Err(DriverError::InvalidConfig {
                message: "I/O timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("invalid device configuration: {message}")]
    InvalidConfig { message: String },

    #[error("timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("connection refused: {message}")]
    Refused { message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("device not connected")]
    NotConnected,

    #[error("unknown or read-only tag `{name}`")]
    UnknownTag { name: String },
}

/// Capability the core needs from a device. Implementations own the wire
/// protocol; every call must return within the configured I/O timeout.
pub trait DeviceDriver: Send {
    fn connect(&mut self, config: &DeviceConfig) -> Result<(), DriverError>;
    fn disconnect(&mut self);
    fn read_all(&mut self) -> Result<ProcessSnapshot, DriverError>;
    fn write_bit(&mut self, name: &str, value: bool) -> Result<(), DriverError>;
}

impl<D: DeviceDriver + ?Sized> DeviceDriver for Box<D> {
    fn connect(&mut self, config: &DeviceConfig) -> Result<(), DriverError> {
        (**self).connect(config)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn read_all(&mut self) -> Result<ProcessSnapshot, DriverError> {
        (**self).read_all()
    }

    fn write_bit(&mut self, name: &str, value: bool) -> Result<(), DriverError> {
        (**self).write_bit(name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_address() {
        let err = DeviceConfig::new("   ").validate().unwrap_err();
        assert!(matches!(err, DriverError::InvalidConfig { .. }));
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = DeviceConfig::new("10.0.0.5")
            .with_io_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn accepts_address_with_defaults() {
        let config = DeviceConfig::new("10.0.0.5:502").with_device_id(3);
        assert!(config.validate().is_ok());
        assert_eq!(config.io_timeout, Duration::from_millis(200));
    }
}
