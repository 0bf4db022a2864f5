//! Emitter trait for domain code raising events.

use std::future::Future;
use std::sync::Arc;

use crate::bus::EventBus;
use crate::event::{Event, EventKind};

/// Anything that can hand events to an [`EventBus`].
///
/// Domain mutation handlers call [`EventEmitter::emit`] once their change has
/// committed. Emitting never fails and never waits for subscribers.
pub trait EventEmitter: Send + Sync {
    fn event_bus(&self) -> &EventBus;

    fn emit(&self, event: Event) -> impl Future<Output = ()> + Send {
        self.event_bus().emit(event)
    }

    /// Builds an unscoped event from `payload` and emits it.
    fn emit_kind(&self, kind: EventKind, payload: impl serde::Serialize) -> impl Future<Output = ()> + Send {
        self.emit(Event::new(kind, payload))
    }
}

/// Cloneable handle on a shared bus, for request handlers and services.
#[derive(Clone)]
pub struct SharedEventEmitter(Arc<EventBus>);

impl SharedEventEmitter {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self(bus)
    }
}

impl EventEmitter for SharedEventEmitter {
    fn event_bus(&self) -> &EventBus {
        &self.0
    }
}
