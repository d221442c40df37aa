pub mod bus;
pub mod connection;
pub mod driver;
pub mod engine;
pub mod event;
pub mod mock;
pub mod simulation;
pub mod snapshot;
pub mod tags;

pub use bus::{HandlerError, HandlerResult, StatusBus, Subscription};
pub use connection::ConnectionManager;
pub use driver::{DeviceConfig, DeviceDriver, DriverError};
pub use engine::{EngineConfig, EngineConfigError, EngineHandle, PollEngine, PollStats};
pub use event::{ConnectionState, EventKind, StatusEvent};
pub use mock::MockDriver;
pub use simulation::{SimulationProfile, Simulator, WalkBand};
pub use snapshot::ProcessSnapshot;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
