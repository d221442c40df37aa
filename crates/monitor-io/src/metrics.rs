//! Prometheus metrics for the PLC monitor.
//!
//! Process gauges are named from the tag map; connection gauges and
//! counters are fed from status-bus events by the runtime.

use monitor_core::{tags, ConnectionState, StatusEvent};
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Header, Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn gauge(name: &str, help: &str) -> Gauge {
    let gauge = Gauge::new(name, help).unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
}

fn int_gauge(name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
}

fn counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
}

// ============================================================================
// Poll Metrics
// ============================================================================

/// Snapshots published by the poll engine
pub static POLL_TICKS: LazyLock<IntCounter> =
    LazyLock::new(|| counter("plcmon_poll_ticks_total", "Snapshots published by the poll loop"));

pub static SIMULATED_TICKS: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "plcmon_simulated_ticks_total",
        "Snapshots produced by the simulator instead of the PLC",
    )
});

// ============================================================================
// Connection Metrics
// ============================================================================

/// 1 while a PLC session is open
pub static PLC_CONNECTED: LazyLock<IntGauge> = LazyLock::new(|| {
    int_gauge(
        "plcmon_plc_connected",
        "PLC connection status (1=connected, 0=not connected)",
    )
});

/// 1 while data comes from the simulator
pub static SIMULATING: LazyLock<IntGauge> = LazyLock::new(|| {
    int_gauge(
        "plcmon_simulating",
        "Simulation mode (1=simulated data, 0=live data)",
    )
});

pub static CONNECTION_STATE: LazyLock<IntGauge> = LazyLock::new(|| {
    int_gauge(
        "plcmon_connection_state",
        "Connection state (0=disconnected,1=connecting,2=connected,3=simulation_fallback)",
    )
});

pub static CONNECTION_CHANGES: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "plcmon_connection_changes_total",
        "Connection state changes published",
    )
});

pub static SIMULATION_FALLBACKS: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "plcmon_simulation_fallbacks_total",
        "Transitions into simulation fallback (failed connect or lost link)",
    )
});

// ============================================================================
// Process State Metrics
// ============================================================================

pub static TANK_LEVEL_PCT: LazyLock<Gauge> =
    LazyLock::new(|| gauge(tags::TANK_LEVEL_PCT.metric, "Tank level in percent"));

pub static TEMPERATURE_C: LazyLock<Gauge> =
    LazyLock::new(|| gauge(tags::TEMPERATURE_C.metric, "Process temperature in Celsius"));

pub static PRESSURE_BAR: LazyLock<Gauge> =
    LazyLock::new(|| gauge(tags::PRESSURE_BAR.metric, "Line pressure in bar"));

pub static MOTOR_SPEED_RPM: LazyLock<Gauge> =
    LazyLock::new(|| gauge(tags::MOTOR_SPEED_RPM.metric, "Motor speed in RPM"));

pub static SYSTEM_RUNNING: LazyLock<IntGauge> = LazyLock::new(|| {
    int_gauge(
        tags::SYSTEM_RUNNING.metric,
        "Run command (1=running, 0=stopped)",
    )
});

// ============================================================================
// Bridge Metrics
// ============================================================================

/// Bridge client connection status (1 = connected, 0 = disconnected)
pub static BRIDGE_CONNECTED: LazyLock<IntGauge> = LazyLock::new(|| {
    int_gauge(
        "plcmon_bridge_connected",
        "Bridge client connection status (1=connected, 0=disconnected)",
    )
});

pub static BRIDGE_COMMANDS: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "plcmon_bridge_commands_total",
        "Commands received from bridge clients",
    )
});

/// Update gauges and counters from one status event.
pub fn record_event(event: &StatusEvent) {
    match event {
        StatusEvent::ConnectionChanged { state, .. } => {
            CONNECTION_CHANGES.inc();
            if *state == ConnectionState::SimulationFallback {
                SIMULATION_FALLBACKS.inc();
            }
            record_connection_state(*state);
        }
        StatusEvent::DataUpdated { snapshot } => {
            POLL_TICKS.inc();
            if SIMULATING.get() != 0 {
                SIMULATED_TICKS.inc();
            }
            TANK_LEVEL_PCT.set(snapshot.tank_level());
            TEMPERATURE_C.set(snapshot.temperature());
            PRESSURE_BAR.set(snapshot.pressure());
            MOTOR_SPEED_RPM.set(f64::from(snapshot.motor_speed()));
            SYSTEM_RUNNING.set(i64::from(snapshot.is_running()));
        }
    }
}

pub fn record_connection_state(state: ConnectionState) {
    PLC_CONNECTED.set(i64::from(state.is_connected()));
    SIMULATING.set(i64::from(state.is_simulating()));
    CONNECTION_STATE.set(i64::from(state.code()));
}

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            match request.url() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = REGISTRY.gather();
                    let mut buffer = Vec::new();

                    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                        tracing::warn!("Failed to encode metrics: {}", e);
                        let _ = request.respond(
                            Response::from_string("Internal Server Error").with_status_code(500),
                        );
                        continue;
                    }

                    let mut response = Response::from_data(buffer);
                    if let Ok(header) = Header::from_bytes(
                        &b"Content-Type"[..],
                        &b"text/plain; version=0.0.4"[..],
                    ) {
                        response = response.with_header(header);
                    }
                    let _ = request.respond(response);
                }
                "/health" => {
                    let _ = request.respond(Response::from_string("OK"));
                }
                "/ready" => {
                    // Ready once the first snapshot has been published
                    if POLL_TICKS.get() > 0 {
                        let _ = request.respond(Response::from_string("Ready"));
                    } else {
                        let _ = request
                            .respond(Response::from_string("Not Ready").with_status_code(503));
                    }
                }
                _ => {
                    let _ =
                        request.respond(Response::from_string("Not Found").with_status_code(404));
                }
            }
        }
    })
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = POLL_TICKS.get();
    let _ = SIMULATED_TICKS.get();
    let _ = CONNECTION_CHANGES.get();
    let _ = SIMULATION_FALLBACKS.get();
    let _ = TANK_LEVEL_PCT.get();
    let _ = TEMPERATURE_C.get();
    let _ = PRESSURE_BAR.get();
    let _ = MOTOR_SPEED_RPM.get();
    let _ = SYSTEM_RUNNING.get();
    let _ = BRIDGE_CONNECTED.get();
    let _ = BRIDGE_COMMANDS.get();
    record_connection_state(ConnectionState::Disconnected);
}
