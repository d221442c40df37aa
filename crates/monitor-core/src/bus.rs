//! Typed fan-out of [`StatusEvent`]s.
//!
//! Handlers run synchronously on the publisher's thread, in registration
//! order. The registry lock is released before any handler runs, so a
//! handler may subscribe or drop its own [`Subscription`] without disturbing
//! the delivery in progress. A handler that returns an error or panics is
//! logged and counted; delivery continues with the next handler.

use crate::event::{EventKind, StatusEvent};
use crate::lock;
use log::{error, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

type Handler = Arc<dyn Fn(&StatusEvent) -> HandlerResult + Send + Sync>;

struct Registration {
    id: u64,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Registration>,
}

#[derive(Clone, Default)]
pub struct StatusBus {
    registry: Arc<Mutex<Registry>>,
    failures: Arc<AtomicU64>,
}

impl StatusBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&StatusEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.entries.push(Registration {
            id,
            kind,
            handler: Arc::new(handler),
        });
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `event` to every handler registered for its kind.
    /// Returns how many handlers completed without error.
    pub fn publish(&self, event: &StatusEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<(u64, Handler)> = lock(&self.registry)
            .entries
            .iter()
            .filter(|entry| entry.kind == kind)
            .map(|entry| (entry.id, Arc::clone(&entry.handler)))
            .collect();

        let mut delivered = 0;
        for (id, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| (*handler)(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!("status subscriber {id} failed on {kind:?}: {err}");
                }
                Err(_) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    error!("status subscriber {id} panicked on {kind:?}");
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        lock(&self.registry)
            .entries
            .iter()
            .filter(|entry| entry.kind == kind)
            .count()
    }

    /// Handler errors and panics caught since the bus was created.
    pub fn handler_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Registration handle. Dropping it unsubscribes the handler.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    /// Keep the handler registered for as long as the bus lives.
    pub fn detach(mut self) {
        self.registry = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).entries.retain(|entry| entry.id != self.id);
        }
    }
}
