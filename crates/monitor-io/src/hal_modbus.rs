use monitor_core::tags::{self, Area, Tag};
use monitor_core::{DeviceConfig, DeviceDriver, DriverError, ProcessSnapshot};
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

pub const DEFAULT_PORT: u16 = 502;

struct Session {
    ctx: Context,
    address: SocketAddr,
    io_timeout: Duration,
}

/// Modbus TCP device driver.
///
/// Blocking facade over a private current-thread Tokio runtime; every
/// request is bounded by the configured I/O timeout. A failed read drops
/// the session, so the next read reports `NotConnected` until the caller
/// connects again. A failed write leaves the session open; the next read
/// decides whether the link is still alive.
pub struct ModbusDriver {
    runtime: Runtime,
    session: Option<Session>,
}

impl ModbusDriver {
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            runtime,
            session: None,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.session.as_ref().map(|session| session.address)
    }

    fn drop_session(&mut self, reason: &DriverError) {
        if let Some(session) = self.session.take() {
            warn!(peer = %session.address, error = %reason, "dropping Modbus session");
            let _guard = self.runtime.enter();
            drop(session);
        }
    }
}

impl DeviceDriver for ModbusDriver {
    fn connect(&mut self, config: &DeviceConfig) -> Result<(), DriverError> {
        if self.session.is_some() {
            self.disconnect();
        }
        let address = resolve_address(&config.address)?;
        let io_timeout = config.io_timeout;
        let slave = Slave(config.device_id);

        let ctx = self
            .runtime
            .block_on(timed(io_timeout, tcp::connect_slave(address, slave)))?;

        info!(peer = %address, unit = config.device_id, "Modbus TCP session open");
        self.session = Some(Session {
            ctx,
            address,
            io_timeout,
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            let io_timeout = session.io_timeout;
            if let Err(err) = self
                .runtime
                .block_on(timed(io_timeout, session.ctx.disconnect()))
            {
                debug!(peer = %session.address, error = %err, "Modbus disconnect was not clean");
            }
            let _guard = self.runtime.enter();
            drop(session);
            info!("Modbus TCP session closed");
        }
    }

    fn read_all(&mut self) -> Result<ProcessSnapshot, DriverError> {
        let session = self.session.as_mut().ok_or(DriverError::NotConnected)?;
        let io_timeout = session.io_timeout;
        let first = tags::INPUT_REGISTERS[0].address;
        let count = tags::INPUT_REGISTERS.len() as u16;
        let ctx = &mut session.ctx;

        let result = self.runtime.block_on(async {
            let registers = timed(io_timeout, ctx.read_input_registers(first, count)).await?;
            let coils = timed(
                io_timeout,
                ctx.read_coils(tags::SYSTEM_RUNNING.address, 1),
            )
            .await?;
            decode_snapshot(first, &registers, &coils)
        });

        result.inspect_err(|err| self.drop_session(err))
    }

    fn write_bit(&mut self, name: &str, value: bool) -> Result<(), DriverError> {
        let tag = writable_coil(name)?;
        let session = self.session.as_mut().ok_or(DriverError::NotConnected)?;
        let io_timeout = session.io_timeout;
        let ctx = &mut session.ctx;

        let result = self
            .runtime
            .block_on(timed(io_timeout, ctx.write_single_coil(tag.address, value)));

        match result {
            Ok(()) => {
                debug!(tag = tag.key, value, "coil written");
                Ok(())
            }
            Err(err) => {
                warn!(tag = tag.key, value, error = %err, "coil write failed");
                Err(err)
            }
        }
    }
}

/// Accepts `ip:port` or a bare IP, which gets the standard Modbus port.
pub fn resolve_address(address: &str) -> Result<SocketAddr, DriverError> {
    let address = address.trim();
    if let Ok(socket) = address.parse::<SocketAddr>() {
        return Ok(socket);
    }
    address
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DEFAULT_PORT))
        .map_err(|_| DriverError::InvalidConfig {
            message: format!("`{address}` is not an IP address or ip:port"),
        })
}

pub fn map_io_error(err: &io::Error, io_timeout: Duration) -> DriverError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => DriverError::Refused {
            message: err.to_string(),
        },
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => DriverError::Timeout {
            timeout_ms: io_timeout.as_millis() as u64,
        },
        io::ErrorKind::InvalidData => DriverError::Protocol {
            message: err.to_string(),
        },
        _ => DriverError::Transport {
            message: err.to_string(),
        },
    }
}

async fn timed<T, F>(io_timeout: Duration, request: F) -> Result<T, DriverError>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(io_timeout, request).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(map_io_error(&err, io_timeout)),
        Err(_) => Err(DriverError::Timeout {
            timeout_ms: io_timeout.as_millis() as u64,
        }),
    }
}

fn writable_coil(name: &str) -> Result<&'static Tag, DriverError> {
    tags::lookup(name)
        .filter(|tag| tag.area == Area::Coil)
        .ok_or_else(|| DriverError::UnknownTag {
            name: name.to_string(),
        })
}

fn decode_snapshot(
    first: u16,
    registers: &[u16],
    coils: &[bool],
) -> Result<ProcessSnapshot, DriverError> {
    let register = |tag: &Tag| -> Result<f64, DriverError> {
        let offset = usize::from(tag.address.wrapping_sub(first));
        registers
            .get(offset)
            .map(|raw| tag.decode(*raw))
            .ok_or_else(|| DriverError::Protocol {
                message: format!(
                    "short register response: {} of {} words",
                    registers.len(),
                    tags::INPUT_REGISTERS.len()
                ),
            })
    };
    let running = coils.first().copied().ok_or_else(|| DriverError::Protocol {
        message: "empty coil response".to_string(),
    })?;

    Ok(ProcessSnapshot::new(
        register(&tags::TANK_LEVEL_PCT)?,
        register(&tags::TEMPERATURE_C)?,
        register(&tags::PRESSURE_BAR)?,
        register(&tags::MOTOR_SPEED_RPM)?.round() as i32,
        running,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn bare_ip_gets_default_port() {
        assert_eq!(
            resolve_address("192.168.1.10").unwrap(),
            "192.168.1.10:502".parse().unwrap()
        );
        assert_eq!(
            resolve_address(" 10.0.0.5:1502 ").unwrap(),
            "10.0.0.5:1502".parse().unwrap()
        );
        assert!(matches!(
            resolve_address("plc.local"),
            Err(DriverError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn io_errors_map_to_driver_errors() {
        let timeout = Duration::from_millis(150);
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(matches!(map_io_error(&refused, timeout), DriverError::Refused { .. }));
        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(
            map_io_error(&timed_out, timeout),
            DriverError::Timeout { timeout_ms: 150 }
        );
        let invalid = io::Error::new(io::ErrorKind::InvalidData, "bad function code");
        assert!(matches!(map_io_error(&invalid, timeout), DriverError::Protocol { .. }));
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(matches!(map_io_error(&reset, timeout), DriverError::Transport { .. }));
    }

    #[test]
    fn decodes_registers_through_tag_map() {
        let registers = [655, (-125i16) as u16, 240, 1450];
        let snapshot = decode_snapshot(0, &registers, &[true]).unwrap();
        assert_eq!(snapshot.tank_level(), 65.5);
        assert_eq!(snapshot.temperature(), -12.5);
        assert_eq!(snapshot.pressure(), 2.4);
        assert_eq!(snapshot.motor_speed(), 1450);
        assert!(snapshot.is_running());
    }

    #[test]
    fn short_response_is_a_protocol_error() {
        assert!(matches!(
            decode_snapshot(0, &[1, 2], &[false]),
            Err(DriverError::Protocol { .. })
        ));
        assert!(matches!(
            decode_snapshot(0, &[1, 2, 3, 4], &[]),
            Err(DriverError::Protocol { .. })
        ));
    }

    #[test]
    fn calls_without_session_are_rejected() {
        let mut driver = ModbusDriver::new().unwrap();
        assert_eq!(driver.read_all(), Err(DriverError::NotConnected));
        assert_eq!(
            driver.write_bit("system_running", true),
            Err(DriverError::NotConnected)
        );
        assert!(matches!(
            driver.write_bit("tank_level_pct", true),
            Err(DriverError::UnknownTag { .. })
        ));
    }

    #[test]
    fn closed_port_fails_to_connect() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut driver = ModbusDriver::new().unwrap();
        let config = DeviceConfig::new(format!("127.0.0.1:{port}"))
            .with_io_timeout(Duration::from_millis(300));
        let err = driver.connect(&config).unwrap_err();
        assert!(matches!(
            err,
            DriverError::Refused { .. } | DriverError::Timeout { .. }
        ));
        assert!(!driver.is_connected());
    }

    #[test]
    fn peer_hangup_drops_session() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let mut driver = ModbusDriver::new().unwrap();
        let config =
            DeviceConfig::new(address.to_string()).with_io_timeout(Duration::from_millis(500));
        driver.connect(&config).unwrap();
        assert_eq!(driver.peer(), Some(address));
        server.join().unwrap();

        assert!(driver.read_all().is_err());
        assert!(!driver.is_connected());
        assert_eq!(driver.read_all(), Err(DriverError::NotConnected));
    }

    #[test]
    fn rejected_write_keeps_session() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            // Write Single Coil: 7 byte MBAP header + 5 byte PDU
            let mut request = [0u8; 12];
            stream.read_exact(&mut request).unwrap();
            let exception = [
                request[0], request[1], // transaction id
                0, 0, // protocol id
                0, 3, // length
                request[6], // unit id
                0x85, // function 0x05 with the exception bit
                0x02, // illegal data address
            ];
            stream.write_all(&exception).unwrap();
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest);
        });

        let mut driver = ModbusDriver::new().unwrap();
        let config =
            DeviceConfig::new(address.to_string()).with_io_timeout(Duration::from_millis(500));
        driver.connect(&config).unwrap();

        assert!(driver.write_bit("system_running", true).is_err());
        assert!(driver.is_connected());
        assert_eq!(driver.peer(), Some(address));

        driver.disconnect();
        server.join().unwrap();
    }
}
