//! # League Events
//!
//! Domain event model for the league platform:
//! - One canonical [`EventKind`] enum for every announced occurrence
//! - Events optionally scoped to a team and/or player
//! - A fire-and-forget [`EventBus`] that domain code emits into
//!
//! ## Example
//!
//! ```rust,ignore
//! use league_events::{Event, EventBus, EventKind};
//!
//! let bus = EventBus::new();
//! bus.on_all(webhook_handler).await;
//!
//! // After the team row has been committed
//! let event = Event::new(EventKind::TeamUpdate, serde_json::json!({ "name": "Ravens" }))
//!     .with_team(5);
//! bus.emit(event).await;
//! ```

mod bus;
mod emitter;
mod error;
mod event;
mod handler;

pub use bus::EventBus;
pub use emitter::{EventEmitter, SharedEventEmitter};
pub use error::{EventError, EventResult};
pub use event::{Event, EventKind};
pub use handler::{EventHandler, HandlerResult, SharedHandler};
