//! # League Webhooks
//!
//! Webhook delivery engine for the league platform providing:
//! - Subscription registry with scoped event filters
//! - Concurrent fan-out with per-subscription rate limiting
//! - Retries with exponential backoff and exhaustion alerts
//! - HMAC signed payloads and a verification handshake
//! - Per-subscription health and analytics
//!
//! ## Example
//!
//! ```rust,ignore
//! use league_events::{Event, EventBus, EventKind};
//! use league_webhooks::{NewSubscription, WebhookSystem};
//!
//! let system = Arc::new(WebhookSystem::new()?);
//!
//! system
//!     .create(NewSubscription::new("https://example.com/hook", "secret", [EventKind::GameResult]).team(5))
//!     .await?;
//!
//! // Deliver events published on the bus
//! system.clone().connect_to_events(&event_bus).await;
//! let scheduler = system.start_scheduler();
//! ```

mod delivery;
mod dispatcher;
mod error;
mod monitor;
mod query;
mod receiver;
mod registry;
mod retry;
mod scheduler;
mod signature;
mod storage;
mod subscription;
mod system;
mod verification;
pub mod rate_limiter;

pub use delivery::{DeliveryEngine, DeliveryOutcome, DeliveryPayload, DeliveryTransport, MAX_ERROR_BODY};
#[cfg(feature = "http-client")]
pub use delivery::HttpTransport;
pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::{WebhookError, WebhookResult};
pub use monitor::{Alert, AnalyticsRecord, HealthRecord, HealthStatus, WebhookMonitor};
pub use query::{ListQuery, SortOrder, SubscriptionFilter, SubscriptionSort};
pub use rate_limiter::{RateLimitInfo, WebhookRateLimiter};
pub use receiver::WebhookReceiver;
pub use registry::SubscriptionRegistry;
pub use retry::{ExponentialBackoff, RetryRecord, RetryState, RetryStrategy};
pub use scheduler::{RetryScheduler, SchedulerHandle, SweepReport};
pub use signature::WebhookSigner;
pub use storage::{InMemoryWebhookStorage, WebhookStorage};
pub use subscription::{
    DEFAULT_RATE_LIMIT, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY, NewSubscription, Subscription,
    SubscriptionPatch,
};
pub use system::{WebhookConfig, WebhookEventHandler, WebhookSystem};
pub use verification::{VerificationChallenge, VerificationResponse};
#[cfg(feature = "http-client")]
pub use verification::Verifier;
