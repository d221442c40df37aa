use crate::bus::{HandlerResult, StatusBus, Subscription};
use crate::connection::ConnectionManager;
use crate::driver::{DeviceConfig, DeviceDriver, DriverError};
use crate::event::{ConnectionState, EventKind, StatusEvent};
use crate::lock;
use crate::simulation::Simulator;
use crate::snapshot::ProcessSnapshot;
use crate::tags;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    pub device: DeviceConfig,
    /// Initial run/stop command.
    pub start_running: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            device: DeviceConfig::default(),
            start_running: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineConfigError> {
        if self.poll_interval.is_zero() {
            return Err(EngineConfigError::ZeroPollInterval);
        }
        if self.device.io_timeout >= self.poll_interval {
            return Err(EngineConfigError::TimeoutNotBelowInterval {
                io_timeout_ms: self.device.io_timeout.as_millis() as u64,
                poll_interval_ms: self.poll_interval.as_millis() as u64,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineConfigError {
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("device I/O timeout ({io_timeout_ms} ms) must be shorter than the poll interval ({poll_interval_ms} ms)")]
    TimeoutNotBelowInterval {
        io_timeout_ms: u64,
        poll_interval_ms: u64,
    },
}

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct PollStats {
    pub ticks_executed: u64,
    pub device_ticks: u64,
    pub simulated_ticks: u64,
    pub connection_losses: u64,
    /// Ticks that started more than one period late.
    pub overruns: u64,
    pub last_tick_us: u64,
    pub max_tick_us: u64,
}

struct EngineState<D: DeviceDriver> {
    manager: ConnectionManager<D>,
    snapshot: ProcessSnapshot,
    stats: PollStats,
}

struct EngineCore<D: DeviceDriver> {
    state: Mutex<EngineState<D>>,
    bus: StatusBus,
    config: EngineConfig,
}

impl<D: DeviceDriver> EngineCore<D> {
    fn tick(&self) {
        let started = Instant::now();
        let events = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;

            let was_connected = state.manager.state().is_connected();
            state.snapshot = state.manager.read_snapshot(&state.snapshot);
            let connected = state.manager.state().is_connected();

            let stats = &mut state.stats;
            stats.ticks_executed += 1;
            if connected {
                stats.device_ticks += 1;
            } else {
                stats.simulated_ticks += 1;
            }
            if was_connected && !connected {
                stats.connection_losses += 1;
            }
            let tick_us = started.elapsed().as_micros() as u64;
            stats.last_tick_us = tick_us;
            stats.max_tick_us = stats.max_tick_us.max(tick_us);

            let mut events = state.manager.take_events();
            events.push(StatusEvent::data_updated(state.snapshot));
            events
        };
        self.publish(&events);
    }

    fn connect(&self) -> bool {
        let (connected, events) = {
            let mut state = lock(&self.state);
            let connected = state.manager.connect(&self.config.device);
            (connected, state.manager.take_events())
        };
        self.publish(&events);
        connected
    }

    fn disconnect(&self) {
        let events = {
            let mut state = lock(&self.state);
            state.manager.disconnect();
            state.manager.take_events()
        };
        self.publish(&events);
    }

    fn set_running(&self, running: bool) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        state.snapshot.set_running(running);
        info!("run command: {}", if running { "start" } else { "stop" });
        if state.manager.state().is_connected() {
            state
                .manager
                .write_setpoint(tags::SYSTEM_RUNNING.key, running)
        } else {
            Ok(())
        }
    }

    fn note_overruns(&self, missed: u64) {
        lock(&self.state).stats.overruns += missed;
    }

    fn publish(&self, events: &[StatusEvent]) {
        for event in events {
            self.bus.publish(event);
        }
    }
}

/// Cloneable, thread-safe command and query surface of a [`PollEngine`].
pub struct EngineHandle<D: DeviceDriver> {
    core: Arc<EngineCore<D>>,
}

impl<D: DeviceDriver> Clone for EngineHandle<D> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<D: DeviceDriver> EngineHandle<D> {
    pub fn connect(&self) -> bool {
        self.core.connect()
    }

    pub fn disconnect(&self) {
        self.core.disconnect()
    }

    /// Set the run/stop command. The local flag is always updated; when a
    /// device is connected the command is also written to it, and a failed
    /// write is returned.
    pub fn set_running(&self, running: bool) -> Result<(), DriverError> {
        self.core.set_running(running)
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        lock(&self.core.state).snapshot
    }

    pub fn connection_state(&self) -> ConnectionState {
        lock(&self.core.state).manager.state()
    }

    pub fn status_text(&self) -> String {
        lock(&self.core.state).manager.status().to_string()
    }

    pub fn is_simulating(&self) -> bool {
        lock(&self.core.state).manager.is_simulating()
    }

    pub fn stats(&self) -> PollStats {
        lock(&self.core.state).stats.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    pub fn bus(&self) -> &StatusBus {
        &self.core.bus
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&StatusEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.core.bus.subscribe(kind, handler)
    }
}

struct Worker {
    stop_tx: mpsc::Sender<()>,
    stopping: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Fixed-period poll loop. Owns the live snapshot; each tick reads the
/// device (or the simulator) and publishes a copy on the bus.
pub struct PollEngine<D: DeviceDriver + 'static> {
    handle: EngineHandle<D>,
    worker: Option<Worker>,
}

impl<D: DeviceDriver + 'static> PollEngine<D> {
    pub fn new(driver: D, config: EngineConfig, bus: StatusBus) -> Result<Self, EngineConfigError> {
        Self::with_simulator(driver, config, bus, Simulator::new())
    }

    pub fn with_simulator(
        driver: D,
        config: EngineConfig,
        bus: StatusBus,
        simulator: Simulator,
    ) -> Result<Self, EngineConfigError> {
        config.validate()?;
        let state = EngineState {
            manager: ConnectionManager::with_simulator(driver, simulator),
            snapshot: ProcessSnapshot::default().with_running(config.start_running),
            stats: PollStats::default(),
        };
        Ok(Self {
            handle: EngineHandle {
                core: Arc::new(EngineCore {
                    state: Mutex::new(state),
                    bus,
                    config,
                }),
            },
            worker: None,
        })
    }

    pub fn handle(&self) -> EngineHandle<D> {
        self.handle.clone()
    }

    /// Spawn the poll thread. Calling it again while running is a no-op.
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (stop_tx, stop_rx) = mpsc::channel();
        let stopping = Arc::new(AtomicBool::new(false));
        let core = Arc::clone(&self.handle.core);
        let loop_stopping = Arc::clone(&stopping);
        let handle = thread::Builder::new()
            .name("poll-loop".to_string())
            .spawn(move || run_loop(core, stop_rx, loop_stopping))?;

        info!(
            "poll loop started, interval {} ms",
            self.handle.core.config.poll_interval.as_millis()
        );
        self.worker = Some(Worker {
            stop_tx,
            stopping,
            handle,
        });
        Ok(())
    }

    /// Halt the poll thread and wait for it. Idempotent; once this returns
    /// no further tick starts.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.stopping.store(true, Ordering::Release);
        let _ = worker.stop_tx.send(());
        if worker.handle.join().is_err() {
            error!("poll loop thread panicked");
        }
        info!("poll loop stopped");
    }

    pub fn is_started(&self) -> bool {
        self.worker.is_some()
    }

    /// Run one tick on the calling thread.
    pub fn tick(&self) {
        self.handle.core.tick();
    }

    /// Stop polling and release the device.
    pub fn shutdown(mut self) -> PollStats {
        self.teardown();
        self.handle.stats()
    }

    pub fn connect(&self) -> bool {
        self.handle.connect()
    }

    pub fn disconnect(&self) {
        self.handle.disconnect()
    }

    pub fn set_running(&self, running: bool) -> Result<(), DriverError> {
        self.handle.set_running(running)
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        self.handle.snapshot()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.handle.connection_state()
    }

    pub fn status_text(&self) -> String {
        self.handle.status_text()
    }

    pub fn is_simulating(&self) -> bool {
        self.handle.is_simulating()
    }

    pub fn stats(&self) -> PollStats {
        self.handle.stats()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&StatusEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.handle.subscribe(kind, handler)
    }

    fn teardown(&mut self) {
        self.stop();
        self.handle.disconnect();
    }
}

impl<D: DeviceDriver + 'static> Drop for PollEngine<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn run_loop<D: DeviceDriver>(
    core: Arc<EngineCore<D>>,
    stop_rx: mpsc::Receiver<()>,
    stopping: Arc<AtomicBool>,
) {
    let period = core.config.poll_interval;
    let mut next_tick = Instant::now() + period;

    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match stop_rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if stopping.load(Ordering::Acquire) {
            break;
        }

        core.tick();

        next_tick += period;
        let now = Instant::now();
        if now > next_tick {
            let mut missed = 0;
            while next_tick <= now {
                next_tick += period;
                missed += 1;
            }
            warn!("poll tick overran, skipping {missed} tick(s)");
            core.note_overruns(missed);
        }
    }
    debug!("poll loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;

    fn engine(driver: MockDriver, config: EngineConfig) -> PollEngine<MockDriver> {
        PollEngine::with_simulator(driver, config, StatusBus::new(), Simulator::seeded(5)).unwrap()
    }

    fn plc_config() -> EngineConfig {
        EngineConfig {
            device: DeviceConfig::new("10.1.1.20"),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn rejects_timeout_not_below_interval() {
        let config = EngineConfig {
            poll_interval: Duration::from_millis(100),
            device: DeviceConfig::new("10.1.1.20").with_io_timeout(Duration::from_millis(100)),
            start_running: false,
        };
        assert!(matches!(
            config.validate(),
            Err(EngineConfigError::TimeoutNotBelowInterval { .. })
        ));
        let zero = EngineConfig {
            poll_interval: Duration::ZERO,
            ..EngineConfig::default()
        };
        assert_eq!(zero.validate(), Err(EngineConfigError::ZeroPollInterval));
    }

    #[test]
    fn tick_publishes_copy_of_snapshot() {
        let engine = engine(MockDriver::new(), EngineConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = engine.subscribe(EventKind::DataUpdated, move |event| {
            if let StatusEvent::DataUpdated { snapshot } = event {
                sink.lock().unwrap().push(*snapshot);
            }
            Ok(())
        });

        engine.tick();
        engine.tick();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], engine.snapshot());
        assert_eq!(engine.stats().simulated_ticks, 2);
    }

    #[test]
    fn connected_ticks_read_the_device() {
        let reading = ProcessSnapshot::new(20.0, 70.0, 5.0, 1900, true);
        let engine = engine(MockDriver::new().with_reading(reading), plc_config());
        assert!(engine.connect());
        engine.tick();
        assert_eq!(engine.snapshot(), reading);
        assert_eq!(engine.stats().device_ticks, 1);
    }

    #[test]
    fn connection_loss_is_published_before_data() {
        let driver = MockDriver::new();
        let probe = driver.clone();
        let engine = engine(driver, plc_config());
        engine.connect();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut subs = Vec::new();
        for kind in [EventKind::ConnectionChanged, EventKind::DataUpdated] {
            let order = Arc::clone(&order);
            subs.push(engine.subscribe(kind, move |event| {
                order.lock().unwrap().push(event.kind());
                Ok(())
            }));
        }

        probe.break_link();
        engine.tick();
        engine.tick();

        assert_eq!(
            *order.lock().unwrap(),
            vec![
                EventKind::ConnectionChanged,
                EventKind::DataUpdated,
                EventKind::DataUpdated
            ]
        );
        assert_eq!(engine.connection_state(), ConnectionState::SimulationFallback);
        assert_eq!(engine.stats().connection_losses, 1);
    }

    #[test]
    fn set_running_writes_through_when_connected() {
        let driver = MockDriver::new();
        let probe = driver.clone();
        let engine = engine(driver, plc_config());

        engine.set_running(true).unwrap();
        assert!(engine.snapshot().is_running());
        assert!(probe.writes().is_empty());

        engine.connect();
        engine.set_running(false).unwrap();
        assert_eq!(probe.writes(), vec![("system_running".to_string(), false)]);
    }

    #[test]
    fn failed_write_still_updates_local_flag() {
        let driver = MockDriver::new().fail_writes(DriverError::Timeout { timeout_ms: 200 });
        let engine = engine(driver, plc_config());
        engine.connect();
        assert!(engine.set_running(true).is_err());
        assert!(engine.snapshot().is_running());
        assert_eq!(engine.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn timer_ticks_until_stopped() {
        let config = EngineConfig {
            poll_interval: Duration::from_millis(10),
            device: DeviceConfig::new("10.1.1.20").with_io_timeout(Duration::from_millis(5)),
            start_running: false,
        };
        let mut engine = engine(MockDriver::new(), config);
        engine.start().unwrap();
        engine.start().unwrap();
        thread::sleep(Duration::from_millis(120));
        engine.stop();
        engine.stop();

        let ticks = engine.stats().ticks_executed;
        assert!(ticks > 0);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(engine.stats().ticks_executed, ticks);
        assert!(!engine.is_started());
    }

    #[test]
    fn shutdown_forces_disconnected() {
        let driver = MockDriver::new();
        let probe = driver.clone();
        let engine = engine(driver, plc_config());
        engine.connect();
        engine.shutdown();
        assert!(!probe.is_connected());
    }
}
