use monitor_core::{EventKind, StatusBus, Subscription};
use monitor_io::metrics::{init_metrics, record_event, serve_metrics};
use std::thread;
use tracing::info;

pub fn init() {
    init_metrics();
}

pub fn start_metrics_server(addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone())
    })
}

/// Feed the metrics registry from the status bus. Metrics stop updating
/// when the returned subscriptions are dropped.
pub fn attach(bus: &StatusBus) -> Vec<Subscription> {
    [EventKind::ConnectionChanged, EventKind::DataUpdated]
        .into_iter()
        .map(|kind| {
            bus.subscribe(kind, |event| {
                record_event(event);
                Ok(())
            })
        })
        .collect()
}
