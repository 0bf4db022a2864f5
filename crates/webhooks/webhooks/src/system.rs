//! Webhook system - main entry point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use league_events::{Event, EventBus, EventError, EventHandler};

use crate::delivery::{DeliveryEngine, DeliveryTransport};
use crate::dispatcher::{DeliveryContext, DispatchReport, Dispatcher};
use crate::error::{WebhookError, WebhookResult};
use crate::monitor::{AnalyticsRecord, Alert, HealthRecord, WebhookMonitor};
use crate::query::ListQuery;
use crate::rate_limiter::{RateLimitInfo, WebhookRateLimiter};
use crate::registry::SubscriptionRegistry;
use crate::retry::{ExponentialBackoff, RetryRecord};
use crate::scheduler::{RetryScheduler, SchedulerHandle, SweepReport};
use crate::storage::{InMemoryWebhookStorage, WebhookStorage};
use crate::subscription::{NewSubscription, Subscription, SubscriptionPatch};

/// Webhook system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Per-attempt HTTP timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Cap on concurrent delivery attempts.
    pub max_in_flight: usize,
    /// Retry sweep interval in milliseconds.
    pub sweep_interval_ms: u64,
    /// Most records reattempted per sweep.
    pub sweep_batch_size: usize,
    /// Ceiling on the backoff delay in seconds.
    pub max_backoff_secs: u64,
    /// Alerts kept in the feed.
    pub alert_capacity: usize,
    /// Attempts averaged into a subscription's response time.
    pub latency_window: usize,
    /// User-Agent sent with deliveries.
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            max_in_flight: 64,
            sweep_interval_ms: 30_000,
            sweep_batch_size: 100,
            max_backoff_secs: 3600,
            alert_capacity: 1000,
            latency_window: 100,
            user_agent: format!("league-webhooks/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl WebhookConfig {
    /// Creates a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-attempt timeout.
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    /// Sets the in-flight delivery cap.
    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    /// Sets the sweep interval.
    pub fn sweep_interval_ms(mut self, ms: u64) -> Self {
        self.sweep_interval_ms = ms;
        self
    }

    /// Sets the sweep batch size.
    pub fn sweep_batch_size(mut self, size: usize) -> Self {
        self.sweep_batch_size = size;
        self
    }

    /// Sets the backoff ceiling.
    pub fn max_backoff_secs(mut self, secs: u64) -> Self {
        self.max_backoff_secs = secs;
        self
    }

    /// Sets the alert feed capacity.
    pub fn alert_capacity(mut self, capacity: usize) -> Self {
        self.alert_capacity = capacity;
        self
    }

    /// Sets the latency window.
    pub fn latency_window(mut self, window: usize) -> Self {
        self.latency_window = window;
        self
    }

    /// Sets the User-Agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Rejects values that would stall delivery or the retry sweep.
    pub fn validate(&self) -> WebhookResult<()> {
        let zero = [
            ("request_timeout_ms", self.request_timeout_ms == 0),
            ("sweep_interval_ms", self.sweep_interval_ms == 0),
            ("max_in_flight", self.max_in_flight == 0),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((field, _)) => Err(WebhookError::Config(format!("{} must be greater than zero", field))),
            None => Ok(()),
        }
    }
}

/// The main webhook system.
#[derive(Clone)]
pub struct WebhookSystem {
    config: WebhookConfig,
    registry: SubscriptionRegistry,
    limiter: Arc<WebhookRateLimiter>,
    monitor: Arc<WebhookMonitor>,
    dispatcher: Dispatcher,
    scheduler: RetryScheduler,
    #[cfg(feature = "http-client")]
    verifier: crate::verification::Verifier,
}

#[cfg(feature = "http-client")]
impl WebhookSystem {
    /// Creates a webhook system with in-memory storage and HTTP delivery.
    pub fn new() -> WebhookResult<Self> {
        Self::with_config(WebhookConfig::default())
    }

    /// Creates a webhook system with custom configuration.
    pub fn with_config(config: WebhookConfig) -> WebhookResult<Self> {
        config.validate()?;
        let transport = crate::delivery::HttpTransport::new(config.request_timeout(), &config.user_agent)?;
        Self::with_parts(config, Arc::new(InMemoryWebhookStorage::new()), Arc::new(transport))
    }
}

impl WebhookSystem {
    /// Creates a webhook system over custom storage and transport.
    pub fn with_parts(
        config: WebhookConfig,
        storage: Arc<dyn WebhookStorage>,
        transport: Arc<dyn DeliveryTransport>,
    ) -> WebhookResult<Self> {
        config.validate()?;
        let registry = SubscriptionRegistry::new(storage);
        let limiter = Arc::new(WebhookRateLimiter::new());
        let monitor = Arc::new(WebhookMonitor::new(config.latency_window, config.alert_capacity));
        let engine = Arc::new(DeliveryEngine::new(transport, monitor.clone(), config.max_in_flight));
        let strategy = ExponentialBackoff::new().max_delay(Duration::from_secs(config.max_backoff_secs));

        let context = Arc::new(DeliveryContext {
            registry: registry.clone(),
            limiter: limiter.clone(),
            engine,
            strategy: Arc::new(strategy),
        });

        Ok(Self {
            #[cfg(feature = "http-client")]
            verifier: crate::verification::Verifier::new(
                registry.clone(),
                config.request_timeout(),
                &config.user_agent,
            )?,
            dispatcher: Dispatcher::new(context.clone()),
            scheduler: RetryScheduler::new(context, config.sweep_batch_size),
            config,
            registry,
            limiter,
            monitor,
        })
    }

    // ==================== Registration ====================

    /// Registers a subscription.
    pub async fn create(&self, request: NewSubscription) -> WebhookResult<Subscription> {
        self.registry.create(request).await
    }

    /// Gets a subscription by ID.
    pub async fn get(&self, id: &str) -> WebhookResult<Subscription> {
        self.registry.get(id).await
    }

    /// Lists subscriptions.
    pub async fn list(&self, query: &ListQuery) -> WebhookResult<Vec<Subscription>> {
        self.registry.list(query).await
    }

    /// Applies a partial update.
    pub async fn update(&self, id: &str, patch: SubscriptionPatch) -> WebhookResult<Subscription> {
        self.registry.update(id, patch).await
    }

    /// Soft-disables a subscription.
    pub async fn disable(&self, id: &str) -> WebhookResult<Subscription> {
        self.registry.disable(id).await
    }

    /// Deletes a subscription with its retries, limiter window and stats.
    pub async fn delete(&self, id: &str) -> WebhookResult<()> {
        self.registry.delete(id).await?;
        self.limiter.forget(id).await;
        self.monitor.forget(id).await;
        Ok(())
    }

    /// Runs the verification handshake for a subscription.
    #[cfg(feature = "http-client")]
    pub async fn verify(&self, id: &str) -> WebhookResult<Subscription> {
        self.verifier.verify(id).await
    }

    // ==================== Delivery ====================

    /// Dispatches an event in the background. Never blocks on delivery.
    pub fn emit(&self, event: Event) {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(&event).await {
                tracing::error!(event_id = %event.id, error = %e, "Failed to dispatch event");
            }
        });
    }

    /// Dispatches an event and waits for the first attempts.
    pub async fn dispatch(&self, event: &Event) -> WebhookResult<DispatchReport> {
        self.dispatcher.dispatch(event).await
    }

    /// Dispatches an event against an explicit clock.
    pub async fn dispatch_at(&self, event: &Event, now: DateTime<Utc>) -> WebhookResult<DispatchReport> {
        self.dispatcher.dispatch_at(event, now).await
    }

    /// Runs one retry sweep.
    pub async fn process_due(&self, now: DateTime<Utc>) -> WebhookResult<SweepReport> {
        self.scheduler.process_due(now).await
    }

    /// Starts the background retry scheduler at the configured interval.
    pub fn start_scheduler(&self) -> SchedulerHandle {
        self.scheduler.start(self.config.sweep_interval())
    }

    /// Lists the pending retries of a subscription.
    pub async fn pending_retries(&self, id: &str) -> WebhookResult<Vec<RetryRecord>> {
        self.registry.get(id).await?;
        self.registry.storage().retries_for_subscription(id).await
    }

    // ==================== Monitoring ====================

    /// Returns the health of a subscription.
    pub async fn health(&self, id: &str) -> WebhookResult<HealthRecord> {
        let subscription = self.registry.get(id).await?;
        Ok(self.monitor.health(&subscription).await)
    }

    /// Returns the analytics of a subscription.
    pub async fn analytics(&self, id: &str) -> WebhookResult<AnalyticsRecord> {
        self.registry.get(id).await?;
        Ok(self.monitor.analytics(id).await)
    }

    /// Returns the current rate window usage of a subscription.
    pub async fn rate_limit(&self, id: &str) -> WebhookResult<RateLimitInfo> {
        let subscription = self.registry.get(id).await?;
        Ok(self
            .limiter
            .info(id, subscription.rate_limit, Utc::now())
            .await)
    }

    /// Returns the alert feed.
    pub async fn alerts(&self) -> Vec<Alert> {
        self.monitor.alerts().await
    }

    /// Acknowledges an alert. Returns whether it existed.
    pub async fn acknowledge_alert(&self, alert_id: &str) -> bool {
        self.monitor.acknowledge(alert_id).await
    }

    // ==================== Wiring ====================

    /// Creates an event handler that dispatches webhooks.
    pub fn create_event_handler(self: Arc<Self>) -> WebhookEventHandler {
        WebhookEventHandler { system: self }
    }

    /// Connects to an event bus.
    pub async fn connect_to_events(self: Arc<Self>, bus: &EventBus) {
        let handler = self.create_event_handler();
        bus.on_all(handler).await;
    }

    /// Gets the registry.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Gets the monitor.
    pub fn monitor(&self) -> &Arc<WebhookMonitor> {
        &self.monitor
    }

    /// Gets the configuration.
    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }
}

/// Event handler that dispatches webhooks.
pub struct WebhookEventHandler {
    system: Arc<WebhookSystem>,
}

#[async_trait::async_trait]
impl EventHandler for WebhookEventHandler {
    fn id(&self) -> &str {
        "webhook-system"
    }

    async fn handle(&self, event: &Event) -> Result<(), EventError> {
        self.system
            .dispatch(event)
            .await
            .map_err(|e| EventError::HandlerFailed(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryOutcome;
    use crate::monitor::HealthStatus;
    use crate::retry::RetryState;
    use league_events::EventKind;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers from a script, then with `fallback`.
    struct Scripted {
        script: Mutex<VecDeque<bool>>,
        fallback: bool,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(script: &[bool], fallback: bool) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                fallback,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl DeliveryTransport for Scripted {
        async fn attempt(&self, _: &Subscription, _: &Event) -> DeliveryOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let success = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);
            if success {
                DeliveryOutcome::success(200, Duration::from_millis(5))
            } else {
                DeliveryOutcome::failure(Some(500), "HTTP 500: down", Duration::from_millis(5))
            }
        }
    }

    fn system(transport: Arc<Scripted>) -> WebhookSystem {
        WebhookSystem::with_parts(
            WebhookConfig::default(),
            Arc::new(InMemoryWebhookStorage::new()),
            transport,
        )
        .unwrap()
    }

    fn request() -> NewSubscription {
        NewSubscription::new("https://example.com/hook", "secret", [EventKind::GameResult])
    }

    fn game_result() -> Event {
        Event::new(EventKind::GameResult, serde_json::json!({"game_id": 1}))
    }

    fn after(t: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
        t + chrono::Duration::seconds(secs)
    }

    #[tokio::test]
    async fn test_rate_limit_drops_excess_events() {
        let transport = Scripted::new(&[], true);
        let system = system(transport.clone());
        let sub = system.create(request().rate_limit(2)).await.unwrap();
        let t0 = Utc::now();

        let mut delivered = 0;
        let mut limited = 0;
        for ms in [0, 300, 600] {
            let report = system
                .dispatch_at(&game_result(), t0 + chrono::Duration::milliseconds(ms))
                .await
                .unwrap();
            delivered += report.delivered;
            limited += report.rate_limited;
        }

        assert_eq!(delivered, 2);
        assert_eq!(limited, 1);
        assert_eq!(transport.calls(), 2);
        assert_eq!(system.analytics(&sub.id).await.unwrap().rate_limit_hits, 1);
        assert!(system.pending_retries(&sub.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_delivery_exhausts_after_retry_count() {
        let transport = Scripted::new(&[], false);
        let system = system(transport.clone());
        let sub = system
            .create(request().retry_count(3).retry_delay(10))
            .await
            .unwrap();
        let t0 = Utc::now();

        let report = system.dispatch_at(&game_result(), t0).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.retries_scheduled, 1);
        let pending = system.pending_retries(&sub.id).await.unwrap();
        assert_eq!(pending[0].attempt, 1);
        assert_eq!(pending[0].next_attempt, after(t0, 10));

        assert_eq!(system.process_due(after(t0, 5)).await.unwrap().due, 0);

        let sweep = system.process_due(after(t0, 10)).await.unwrap();
        assert_eq!(sweep.rescheduled, 1);
        let pending = system.pending_retries(&sub.id).await.unwrap();
        assert_eq!(pending[0].attempt, 2);
        assert_eq!(pending[0].next_attempt, after(t0, 30));

        let sweep = system.process_due(after(t0, 30)).await.unwrap();
        assert_eq!(sweep.exhausted, 1);
        assert!(system.pending_retries(&sub.id).await.unwrap().is_empty());

        let alerts = system.alerts().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].attempts, 3);
        assert_eq!(alerts[0].record.state, RetryState::Exhausted);

        assert_eq!(system.process_due(after(t0, 86_400)).await.unwrap().due, 0);
        assert_eq!(transport.calls(), 3);

        let stored = system.get(&sub.id).await.unwrap();
        assert_eq!(stored.last_error.as_deref(), Some("HTTP 500: down"));
        assert_eq!(stored.last_retry, Some(after(t0, 30)));

        let health = system.health(&sub.id).await.unwrap();
        assert_eq!(health.error_count, 3);
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.success_rate, Some(0.0));
    }

    #[tokio::test]
    async fn test_scope_mismatch_is_not_delivered() {
        let transport = Scripted::new(&[], true);
        let system = system(transport.clone());
        system.create(request().team(5)).await.unwrap();

        let report = system.dispatch(&game_result().with_team(7)).await.unwrap();
        assert_eq!(report.matched, 0);
        assert_eq!(transport.calls(), 0);

        let report = system.dispatch(&game_result().with_team(5)).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_success_on_second_attempt_clears_retry() {
        let transport = Scripted::new(&[false, true], true);
        let system = system(transport.clone());
        let sub = system.create(request().retry_delay(60)).await.unwrap();
        let t0 = Utc::now();

        system.dispatch_at(&game_result(), t0).await.unwrap();
        let sweep = system.process_due(after(t0, 60)).await.unwrap();
        assert_eq!(sweep.delivered, 1);
        assert!(system.pending_retries(&sub.id).await.unwrap().is_empty());

        let health = system.health(&sub.id).await.unwrap();
        assert_eq!(health.success_count, 1);
        assert_eq!(health.error_count, 1);
        assert_eq!(health.status, HealthStatus::Healthy);

        let analytics = system.analytics(&sub.id).await.unwrap();
        assert_eq!(analytics.retry_distribution[&1], 1);
        assert_eq!(analytics.retry_distribution[&2], 1);
        assert!(system.alerts().await.is_empty());
        assert_eq!(system.get(&sub.id).await.unwrap().last_retry, Some(after(t0, 60)));
    }

    #[tokio::test]
    async fn test_inactive_subscription_never_delivered() {
        let transport = Scripted::new(&[], true);
        let system = system(transport.clone());
        let sub = system.create(request().inactive()).await.unwrap();

        for _ in 0..2 {
            let report = system.dispatch(&game_result()).await.unwrap();
            assert_eq!(report, DispatchReport::default());
        }
        assert_eq!(transport.calls(), 0);
        assert_eq!(system.health(&sub.id).await.unwrap().status, HealthStatus::Inactive);
    }

    #[tokio::test]
    async fn test_single_attempt_subscription_alerts_immediately() {
        let transport = Scripted::new(&[], false);
        let system = system(transport.clone());
        let sub = system.create(request().retry_count(1)).await.unwrap();

        let report = system.dispatch(&game_result()).await.unwrap();
        assert_eq!(report.exhausted, 1);
        assert_eq!(report.retries_scheduled, 0);
        assert!(system.pending_retries(&sub.id).await.unwrap().is_empty());
        assert_eq!(system.alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_for_disabled_subscription_is_discarded() {
        let transport = Scripted::new(&[false], true);
        let system = system(transport.clone());
        let sub = system.create(request().retry_delay(10)).await.unwrap();
        let t0 = Utc::now();

        system.dispatch_at(&game_result(), t0).await.unwrap();
        system.disable(&sub.id).await.unwrap();

        let sweep = system.process_due(after(t0, 10)).await.unwrap();
        assert_eq!(sweep.discarded, 1);
        assert_eq!(transport.calls(), 1);
        assert!(system.pending_retries(&sub.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_retry_waits_without_using_an_attempt() {
        let transport = Scripted::new(&[false], true);
        let system = system(transport.clone());
        let sub = system
            .create(request().rate_limit(1).retry_delay(10))
            .await
            .unwrap();
        let t0 = Utc::now();

        system.dispatch_at(&game_result(), t0).await.unwrap();

        let sweep = system.process_due(after(t0, 10)).await.unwrap();
        assert_eq!(sweep.rate_limited, 1);
        let pending = system.pending_retries(&sub.id).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempt, 1);
        assert_eq!(pending[0].next_attempt, after(t0, 60));

        assert_eq!(system.process_due(after(t0, 30)).await.unwrap().due, 0);

        let sweep = system.process_due(after(t0, 60)).await.unwrap();
        assert_eq!(sweep.delivered, 1);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_rate_limited_retries_do_not_starve_other_subscriptions() {
        let transport = Scripted::new(&[], true);
        let system = WebhookSystem::with_parts(
            WebhookConfig::default().sweep_batch_size(2),
            Arc::new(InMemoryWebhookStorage::new()),
            transport.clone(),
        )
        .unwrap();
        let busy = system.create(request().rate_limit(1)).await.unwrap();
        let quiet = system
            .create(NewSubscription::new("https://quiet.example.com", "secret", [EventKind::TeamUpdate]))
            .await
            .unwrap();
        let t0 = Utc::now();
        let storage = system.registry.storage();
        let strategy = ExponentialBackoff::new();

        // Takes the busy subscription's only slot for the next minute.
        system.dispatch_at(&game_result(), t0).await.unwrap();

        for age in [300, 200, 100] {
            let mut record = RetryRecord::first_failure(&busy, &game_result(), "HTTP 500: down", t0, &strategy);
            record.next_attempt = after(t0, -age);
            assert!(storage.insert_retry(&record).await.unwrap());
        }
        let team_update = Event::new(EventKind::TeamUpdate, ());
        let mut record = RetryRecord::first_failure(&quiet, &team_update, "HTTP 500: down", t0, &strategy);
        record.next_attempt = after(t0, -10);
        assert!(storage.insert_retry(&record).await.unwrap());

        for secs in 0..59 {
            system.process_due(after(t0, secs)).await.unwrap();
        }

        assert!(system.pending_retries(&quiet.id).await.unwrap().is_empty());
        let held = system.pending_retries(&busy.id).await.unwrap();
        assert_eq!(held.len(), 3);
        assert!(held.iter().all(|r| r.attempt == 1 && r.next_attempt == after(t0, 60)));
        assert_eq!(system.analytics(&busy.id).await.unwrap().rate_limit_hits, 3);
    }

    #[tokio::test]
    async fn test_redispatching_failed_event_keeps_one_retry() {
        let transport = Scripted::new(&[], false);
        let system = system(transport.clone());
        let sub = system.create(request()).await.unwrap();
        let event = game_result();

        system.dispatch(&event).await.unwrap();
        let report = system.dispatch(&event).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.retries_scheduled, 0);
        assert_eq!(system.pending_retries(&sub.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_forgets_everything() {
        let transport = Scripted::new(&[], false);
        let system = system(transport.clone());
        let sub = system.create(request()).await.unwrap();

        system.dispatch(&game_result()).await.unwrap();
        system.delete(&sub.id).await.unwrap();

        assert!(system.get(&sub.id).await.is_err());
        assert!(system.pending_retries(&sub.id).await.is_err());
        assert_eq!(system.monitor().analytics(&sub.id).await.total_events, 0);
    }

    /// Fails the first attempt, then blocks every later one until released.
    struct Gated {
        calls: AtomicUsize,
        started: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl DeliveryTransport for Gated {
        async fn attempt(&self, _: &Subscription, _: &Event) -> DeliveryOutcome {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return DeliveryOutcome::failure(None, "connection refused", Duration::ZERO);
            }
            self.started.notify_one();
            self.release.notified().await;
            DeliveryOutcome::success(200, Duration::ZERO)
        }
    }

    #[tokio::test]
    async fn test_sweeps_are_mutually_exclusive() {
        let transport = Arc::new(Gated {
            calls: AtomicUsize::new(0),
            started: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let system = WebhookSystem::with_parts(
            WebhookConfig::default(),
            Arc::new(InMemoryWebhookStorage::new()),
            transport.clone(),
        )
        .unwrap();
        system.create(request().retry_delay(1)).await.unwrap();
        let t0 = Utc::now();
        system.dispatch_at(&game_result(), t0).await.unwrap();

        let first = tokio::spawn({
            let system = system.clone();
            async move { system.process_due(after(t0, 1)).await }
        });
        transport.started.notified().await;

        let second = system.process_due(after(t0, 1)).await.unwrap();
        assert!(second.skipped);

        transport.release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(!first.skipped);
        assert_eq!(first.delivered, 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_background_scheduler_delivers_and_restarts() {
        let transport = Scripted::new(&[false], true);
        let system = WebhookSystem::with_parts(
            WebhookConfig::default().sweep_interval_ms(10),
            Arc::new(InMemoryWebhookStorage::new()),
            transport.clone(),
        )
        .unwrap();
        let sub = system.create(request().retry_delay(1)).await.unwrap();

        // Fail an hour ago so the record is already due.
        system
            .dispatch_at(&game_result(), after(Utc::now(), -3600))
            .await
            .unwrap();
        assert_eq!(system.pending_retries(&sub.id).await.unwrap().len(), 1);

        let handle = system.start_scheduler();
        for _ in 0..200 {
            if system.pending_retries(&sub.id).await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;
        assert!(system.pending_retries(&sub.id).await.unwrap().is_empty());
        assert_eq!(transport.calls(), 2);

        let handle = system.start_scheduler();
        assert!(!handle.is_finished());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_event_bus_integration() {
        let transport = Scripted::new(&[], true);
        let system = Arc::new(system(transport.clone()));
        system.create(request()).await.unwrap();

        let bus = EventBus::new();
        system.clone().connect_to_events(&bus).await;

        let results = bus.emit_sync(game_result()).await;
        assert!(results.iter().all(|r| r.success));
        assert_eq!(transport.calls(), 1);

        bus.emit_sync(Event::new(EventKind::SystemAlert, ())).await;
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_emit_is_fire_and_forget() {
        let transport = Scripted::new(&[], true);
        let system = system(transport.clone());
        let sub = system.create(request()).await.unwrap();

        system.emit(game_result());
        for _ in 0..100 {
            if system.health(&sub.id).await.unwrap().success_count == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(transport.calls(), 1);
        assert_eq!(system.health(&sub.id).await.unwrap().success_count, 1);
    }

    #[test]
    fn test_config_builder() {
        let config = WebhookConfig::new()
            .request_timeout_ms(2_000)
            .max_in_flight(8)
            .sweep_interval_ms(500)
            .user_agent("x");
        assert_eq!(config.request_timeout(), Duration::from_secs(2));
        assert_eq!(config.sweep_interval(), Duration::from_millis(500));
        assert_eq!(config.max_in_flight, 8);
        assert_eq!(config.user_agent, "x");
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        for config in [
            WebhookConfig::new().sweep_interval_ms(0),
            WebhookConfig::new().request_timeout_ms(0),
            WebhookConfig::new().max_in_flight(0),
        ] {
            let result = WebhookSystem::with_parts(
                config,
                Arc::new(InMemoryWebhookStorage::new()),
                Scripted::new(&[], true),
            );
            assert!(matches!(result, Err(WebhookError::Config(_))));
        }
        assert!(WebhookConfig::default().validate().is_ok());
    }
}
