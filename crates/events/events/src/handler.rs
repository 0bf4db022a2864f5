//! Event handler trait and types.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::EventError;
use crate::event::Event;

/// Outcome of one handler run, as collected by [`EventBus::emit_sync`](crate::EventBus::emit_sync).
#[derive(Debug, Clone)]
pub struct HandlerResult {
    pub handler_id: String,
    pub event_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl HandlerResult {
    pub(crate) fn from_outcome(
        handler_id: &str,
        event: &Event,
        outcome: Result<(), EventError>,
        elapsed: Duration,
    ) -> Self {
        Self {
            handler_id: handler_id.to_string(),
            event_id: event.id.clone(),
            success: outcome.is_ok(),
            error: outcome.err().map(|e| e.to_string()),
            elapsed,
        }
    }
}

/// Something reacting to domain events, such as the webhook dispatcher.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs.
    fn id(&self) -> &str {
        "anonymous"
    }

    /// Handles an event. Errors are logged by the bus, never returned to the emitter.
    async fn handle(&self, event: &Event) -> Result<(), EventError>;
}

/// A shared event handler.
pub type SharedHandler = Arc<dyn EventHandler>;
