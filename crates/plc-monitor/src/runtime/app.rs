use crate::infra::audit::{AuditEventType, AuditLogger};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use monitor_core::{
    DeviceConfig, DeviceDriver, DriverError, EngineConfigError, MockDriver, PollEngine,
    ProcessSnapshot, Simulator, StatusBus,
};
use monitor_io::bridge::{BridgeConfig, BridgeServer};
use monitor_io::hal_modbus::ModbusDriver;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid configuration: {0}")]
    Config(#[from] EngineConfigError),

    #[error("failed to open audit log {}: {source}", .path.display())]
    Audit { path: PathBuf, source: io::Error },

    #[error("failed to start Modbus client: {0}")]
    Driver(#[source] io::Error),

    #[error("failed to bind bridge on {addr}: {source}")]
    Bridge { addr: String, source: io::Error },

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: io::Error,
    },

    #[error("failed to build signal runtime: {0}")]
    Signal(#[source] io::Error),
}

/// Device behind the poll engine: a Modbus PLC, or nothing at all.
enum MonitorDevice {
    Modbus(ModbusDriver),
    Offline(MockDriver),
}

impl MonitorDevice {
    fn from_config(config: &RuntimeConfig) -> Result<Self, AppError> {
        match &config.plc_addr {
            Some(_) => Ok(Self::Modbus(ModbusDriver::new().map_err(AppError::Driver)?)),
            None => Ok(Self::Offline(MockDriver::refusing(
                "no PLC address configured (use --plc)",
            ))),
        }
    }
}

impl DeviceDriver for MonitorDevice {
    fn connect(&mut self, config: &DeviceConfig) -> Result<(), DriverError> {
        match self {
            Self::Modbus(d) => d.connect(config),
            Self::Offline(d) => d.connect(config),
        }
    }

    fn disconnect(&mut self) {
        match self {
            Self::Modbus(d) => d.disconnect(),
            Self::Offline(d) => d.disconnect(),
        }
    }

    fn read_all(&mut self) -> Result<ProcessSnapshot, DriverError> {
        match self {
            Self::Modbus(d) => d.read_all(),
            Self::Offline(d) => d.read_all(),
        }
    }

    fn write_bit(&mut self, name: &str, value: bool) -> Result<(), DriverError> {
        match self {
            Self::Modbus(d) => d.write_bit(name, value),
            Self::Offline(d) => d.write_bit(name, value),
        }
    }
}

pub fn run_from_args() -> Result<(), AppError> {
    let config = RuntimeConfig::from_env();
    if config.show_help {
        RuntimeConfig::print_help();
        return Ok(());
    }
    run(config)
}

pub fn run(config: RuntimeConfig) -> Result<(), AppError> {
    let _log_guard = init_tracing(config.json_logs, config.log_dir.as_deref());
    for warning in &config.warnings {
        warn!("{warning}");
    }

    telemetry::init();
    let metrics_enabled = config.metrics_addr.is_some();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    let engine_config = config.engine_config();
    engine_config.validate()?;

    let bus = StatusBus::new();
    let _metric_subscriptions = telemetry::attach(&bus);

    let audit_logger = init_audit_logger(config.audit_path.as_ref())?;
    let _audit_subscription = audit_logger.as_ref().map(|logger| logger.attach(&bus));

    if let Some(ref logger) = audit_logger {
        let _ = logger.log_event(
            AuditEventType::SystemStart,
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "plc": config.plc_addr,
                "poll_interval_ms": config.poll_interval_ms,
                "bridge_enabled": config.bridge_enabled,
                "metrics_enabled": metrics_enabled,
            }),
        );
    }

    let simulator = match config.seed {
        Some(seed) => Simulator::seeded(seed),
        None => Simulator::new(),
    };
    let device = MonitorDevice::from_config(&config)?;
    let mut engine = PollEngine::with_simulator(device, engine_config, bus.clone(), simulator)?;

    info!(
        poll_interval_ms = config.poll_interval_ms,
        io_timeout_ms = config.io_timeout_ms,
        start_running = config.start_running,
        "Starting poll engine"
    );

    match config.plc_addr {
        Some(ref addr) => {
            info!(plc = %addr, unit = config.unit_id, "Connecting to PLC");
            engine.connect();
        }
        None => info!("No PLC configured, serving simulated data"),
    }

    engine.start().map_err(|source| AppError::Spawn {
        name: "poll-loop",
        source,
    })?;

    let stop = Arc::new(AtomicBool::new(false));
    let bridge_handle = if config.bridge_enabled {
        let server = BridgeServer::bind(BridgeConfig {
            bind_addr: config.bind_addr.clone(),
            ..BridgeConfig::default()
        })
        .map_err(|source| AppError::Bridge {
            addr: config.bind_addr.clone(),
            source,
        })?;
        let handle = engine.handle();
        let stop_bridge = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name("bridge".to_string())
            .spawn(move || server.run(handle, stop_bridge))
            .map_err(|source| AppError::Spawn {
                name: "bridge",
                source,
            })?;
        Some(join)
    } else {
        info!("Bridge disabled");
        None
    };

    info!("plc-monitor running");
    wait_for_shutdown(config.run_seconds)?;

    stop.store(true, Ordering::Relaxed);
    if let Some(handle) = bridge_handle {
        if handle.join().is_err() {
            warn!("Bridge thread panicked");
        }
    }

    let handler_failures = bus.handler_failures();
    let stats = engine.shutdown();
    info!(
        ticks_executed = stats.ticks_executed,
        device_ticks = stats.device_ticks,
        simulated_ticks = stats.simulated_ticks,
        connection_losses = stats.connection_losses,
        overruns = stats.overruns,
        max_tick_us = stats.max_tick_us,
        handler_failures,
        "Run complete"
    );

    if let Some(ref logger) = audit_logger {
        let _ = logger.log_event(
            AuditEventType::SystemShutdown,
            serde_json::json!({
                "ticks_executed": stats.ticks_executed,
                "simulated_ticks": stats.simulated_ticks,
                "connection_losses": stats.connection_losses,
            }),
        );
    }
    Ok(())
}

/// Block until Ctrl-C, or until `run_seconds` have passed when set.
fn wait_for_shutdown(run_seconds: Option<u64>) -> Result<(), AppError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(AppError::Signal)?;

    runtime.block_on(async {
        let deadline = async {
            match run_seconds {
                Some(seconds) => {
                    tokio::time::sleep(Duration::from_secs(seconds)).await;
                    info!(seconds, "Run time elapsed");
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let interrupted = tokio::select! {
            result = tokio::signal::ctrl_c() => Some(result),
            () = &mut deadline => None,
        };
        match interrupted {
            Some(Ok(())) => info!("Interrupt received, shutting down"),
            Some(Err(err)) => {
                warn!(error = %err, "Cannot listen for Ctrl-C");
                deadline.await;
            }
            None => {}
        }
    });
    Ok(())
}

fn init_audit_logger(audit_path: Option<&PathBuf>) -> Result<Option<Arc<AuditLogger>>, AppError> {
    audit_path
        .map(|path| match AuditLogger::new(path) {
            Ok(logger) => {
                info!(path = %path.display(), "Audit logging enabled");
                Ok(Arc::new(logger))
            }
            Err(source) => Err(AppError::Audit {
                path: path.clone(),
                source,
            }),
        })
        .transpose()
}
