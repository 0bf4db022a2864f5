//! Event fan-out to matching subscriptions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;

use league_events::Event;

use crate::delivery::DeliveryEngine;
use crate::error::WebhookResult;
use crate::monitor::WebhookMonitor;
use crate::rate_limiter::WebhookRateLimiter;
use crate::registry::SubscriptionRegistry;
use crate::retry::{RetryRecord, RetryStrategy};
use crate::subscription::Subscription;

/// Components shared by the dispatcher and the retry scheduler.
pub(crate) struct DeliveryContext {
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) limiter: Arc<WebhookRateLimiter>,
    pub(crate) engine: Arc<DeliveryEngine>,
    pub(crate) strategy: Arc<dyn RetryStrategy>,
}

impl DeliveryContext {
    pub(crate) fn monitor(&self) -> &Arc<WebhookMonitor> {
        self.engine.monitor()
    }

    /// Consults the rate limiter, counting a hit on denial.
    pub(crate) async fn admit(&self, subscription: &Subscription, event: &Event, now: DateTime<Utc>) -> bool {
        if self
            .limiter
            .allow(&subscription.id, subscription.rate_limit, now)
            .await
        {
            return true;
        }

        self.monitor().record_rate_limited(&subscription.id).await;
        tracing::warn!(
            subscription_id = %subscription.id,
            event_id = %event.id,
            rate_limit = subscription.rate_limit,
            "Webhook delivery rate limited"
        );
        false
    }

    /// Removes an exhausted record from the retry set and alerts on it.
    pub(crate) async fn exhaust(&self, record: &RetryRecord) {
        if let Err(e) = self.registry.storage().delete_retry(&record.id).await {
            tracing::error!(retry_id = %record.id, error = %e, "Failed to remove exhausted retry");
        }
        self.monitor().raise_alert(record).await;
    }
}

/// Counts from one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Active subscriptions in scope for the event.
    pub matched: usize,
    /// Deliveries that succeeded on the first attempt.
    pub delivered: usize,
    /// Deliveries that failed.
    pub failed: usize,
    /// Failures handed to the retry scheduler.
    pub retries_scheduled: usize,
    /// Failures that used up every attempt immediately.
    pub exhausted: usize,
    /// Deliveries dropped by the rate limiter.
    pub rate_limited: usize,
}

enum FirstAttempt {
    Delivered,
    RateLimited,
    Failed { scheduled: bool, exhausted: bool },
}

/// Resolves the subscriptions of an event and makes the first delivery
/// attempt to each, concurrently.
#[derive(Clone)]
pub struct Dispatcher {
    context: Arc<DeliveryContext>,
}

impl Dispatcher {
    pub(crate) fn new(context: Arc<DeliveryContext>) -> Self {
        Self { context }
    }

    /// Dispatches an event now.
    pub async fn dispatch(&self, event: &Event) -> WebhookResult<DispatchReport> {
        self.dispatch_at(event, Utc::now()).await
    }

    /// Dispatches an event with `now` as the rate-limit and scheduling clock.
    ///
    /// Only a failing subscription lookup is returned as an error; every
    /// delivery problem ends up in the report.
    pub async fn dispatch_at(&self, event: &Event, now: DateTime<Utc>) -> WebhookResult<DispatchReport> {
        let subscriptions = self.context.registry.matching(event).await?;
        let mut report = DispatchReport {
            matched: subscriptions.len(),
            ..Default::default()
        };

        if subscriptions.is_empty() {
            tracing::debug!(event_id = %event.id, event = %event.kind, "No webhook subscriptions for event");
            return Ok(report);
        }

        let mut tasks = JoinSet::new();
        for subscription in subscriptions {
            let context = self.context.clone();
            let event = event.clone();
            tasks.spawn(async move { first_attempt(&context, &subscription, &event, now).await });
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(FirstAttempt::Delivered) => report.delivered += 1,
                Ok(FirstAttempt::RateLimited) => report.rate_limited += 1,
                Ok(FirstAttempt::Failed { scheduled, exhausted }) => {
                    report.failed += 1;
                    report.retries_scheduled += usize::from(scheduled);
                    report.exhausted += usize::from(exhausted);
                }
                Err(e) => {
                    tracing::error!(event_id = %event.id, error = %e, "Webhook delivery task panicked");
                }
            }
        }

        tracing::debug!(
            event_id = %event.id,
            event = %event.kind,
            matched = report.matched,
            delivered = report.delivered,
            failed = report.failed,
            rate_limited = report.rate_limited,
            "Dispatched event"
        );
        Ok(report)
    }
}

async fn first_attempt(
    context: &DeliveryContext,
    subscription: &Subscription,
    event: &Event,
    now: DateTime<Utc>,
) -> FirstAttempt {
    if !context.admit(subscription, event, now).await {
        return FirstAttempt::RateLimited;
    }

    let outcome = context.engine.deliver(subscription, event, 1).await;
    if outcome.success {
        return FirstAttempt::Delivered;
    }

    let error = outcome.error_text().to_string();
    if let Err(e) = context.registry.record_failure(&subscription.id, &error).await {
        tracing::warn!(subscription_id = %subscription.id, error = %e, "Failed to store delivery error");
    }

    let record = RetryRecord::first_failure(subscription, event, error, now, context.strategy.as_ref());
    if record.is_exhausted() {
        context.monitor().raise_alert(&record).await;
        return FirstAttempt::Failed {
            scheduled: false,
            exhausted: true,
        };
    }

    let scheduled = match context.registry.storage().insert_retry(&record).await {
        Ok(true) => {
            tracing::info!(
                retry_id = %record.id,
                subscription_id = %subscription.id,
                event_id = %event.id,
                next_attempt = %record.next_attempt,
                "Scheduled webhook retry"
            );
            true
        }
        Ok(false) => {
            tracing::debug!(
                subscription_id = %subscription.id,
                event_id = %event.id,
                "Retry already pending for event"
            );
            false
        }
        Err(e) => {
            tracing::error!(subscription_id = %subscription.id, error = %e, "Failed to schedule retry");
            false
        }
    };

    FirstAttempt::Failed {
        scheduled,
        exhausted: false,
    }
}
