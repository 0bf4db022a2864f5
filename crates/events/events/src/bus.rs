//! Event bus for pub/sub communication.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::event::{Event, EventKind};
use crate::handler::{EventHandler, HandlerResult, SharedHandler};

/// A registered handler. `kind: None` receives every event.
struct Route {
    kind: Option<EventKind>,
    handler: SharedHandler,
}

impl Route {
    fn matches(&self, kind: EventKind) -> bool {
        self.kind.is_none_or(|k| k == kind)
    }
}

/// The event bus domain code emits into after a mutation commits.
///
/// Handlers run in registration order for [`emit_sync`](Self::emit_sync).
#[derive(Default)]
pub struct EventBus {
    routes: RwLock<Vec<Route>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to a single event kind.
    pub async fn on(&self, kind: EventKind, handler: impl EventHandler + 'static) {
        self.register(Some(kind), Arc::new(handler)).await;
    }

    /// Subscribes to all events.
    pub async fn on_all(&self, handler: impl EventHandler + 'static) {
        self.register(None, Arc::new(handler)).await;
    }

    async fn register(&self, kind: Option<EventKind>, handler: SharedHandler) {
        tracing::debug!(handler = handler.id(), kind = ?kind, "Registering event handler");
        self.routes.write().await.push(Route { kind, handler });
    }

    /// Emits an event to all matching subscribers (fire and forget).
    ///
    /// Each handler runs on its own task; the caller never waits for, or
    /// observes, handler outcomes.
    pub async fn emit(&self, event: Event) {
        for handler in self.handlers_for(event.kind).await {
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(e) = handler.handle(&event).await {
                    tracing::error!(
                        handler = handler.id(),
                        event_id = %event.id,
                        event = %event.kind,
                        error = %e,
                        "Event handler failed"
                    );
                }
            });
        }
    }

    /// Emits an event and runs every matching handler to completion, in order.
    pub async fn emit_sync(&self, event: Event) -> Vec<HandlerResult> {
        let handlers = self.handlers_for(event.kind).await;
        let mut results = Vec::with_capacity(handlers.len());

        for handler in handlers {
            let start = Instant::now();
            let outcome = handler.handle(&event).await;
            results.push(HandlerResult::from_outcome(handler.id(), &event, outcome, start.elapsed()));
        }

        results
    }

    /// Number of handlers an event of `kind` would reach, wildcards included.
    pub async fn handler_count(&self, kind: EventKind) -> usize {
        self.routes.read().await.iter().filter(|r| r.matches(kind)).count()
    }

    async fn handlers_for(&self, kind: EventKind) -> Vec<SharedHandler> {
        self.routes
            .read()
            .await
            .iter()
            .filter(|r| r.matches(kind))
            .map(|r| r.handler.clone())
            .collect()
    }
}
