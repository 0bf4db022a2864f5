//! Health and analytics aggregation for webhook subscriptions.
//!
//! Purely observational: nothing here feeds back into delivery decisions.
//! Counters are kept per subscription behind their own lock, so concurrent
//! deliveries to different subscriptions never contend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use league_events::EventKind;

use crate::delivery::DeliveryOutcome;
use crate::retry::RetryRecord;
use crate::subscription::Subscription;

/// Health status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Active and the most recent attempt (if any) succeeded.
    Healthy,
    /// Active but the most recent attempt failed.
    Unhealthy,
    /// Soft-disabled.
    Inactive,
}

/// Health snapshot of one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    /// Subscription the snapshot describes.
    pub subscription_id: String,
    /// Current status.
    pub status: HealthStatus,
    /// When the last attempt was recorded.
    pub last_check: Option<DateTime<Utc>>,
    /// Rolling average latency over the most recent attempts, in milliseconds.
    pub response_time_ms: Option<f64>,
    /// Successful attempts.
    pub success_count: u64,
    /// Failed attempts.
    pub error_count: u64,
    /// `None` until at least one attempt has been recorded.
    pub success_rate: Option<f64>,
    /// Error of the latest failure not yet followed by a success.
    pub last_error: Option<String>,
}

/// Delivery analytics of one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    /// Subscription the figures belong to.
    pub subscription_id: String,
    /// Delivery attempts recorded, initial and retried.
    pub total_events: u64,
    /// Successful attempts.
    pub success_count: u64,
    /// Failed attempts.
    pub failure_count: u64,
    /// Fastest attempt, in milliseconds.
    pub min_latency_ms: Option<f64>,
    /// Mean latency over all attempts, in milliseconds.
    pub avg_latency_ms: Option<f64>,
    /// Slowest attempt, in milliseconds.
    pub max_latency_ms: Option<f64>,
    /// Failed share of attempts; `None` before the first attempt.
    pub error_rate: Option<f64>,
    /// Deliveries turned away by the rate limiter.
    pub rate_limit_hits: u64,
    /// Attempts per event kind.
    pub event_distribution: BTreeMap<EventKind, u64>,
    /// Attempt number -> attempts made with that number.
    pub retry_distribution: BTreeMap<u32, u64>,
}

/// Raised when a retry record is exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Alert ID, used to acknowledge it.
    pub id: String,
    /// Subscription whose delivery gave up.
    pub subscription_id: String,
    /// Event that was never delivered.
    pub event_id: String,
    /// Kind of that event.
    pub event_kind: EventKind,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Error from the final attempt.
    pub last_error: String,
    /// When the record was exhausted.
    pub raised_at: DateTime<Utc>,
    /// The exhausted record, kept for manual redelivery.
    pub record: RetryRecord,
}

#[derive(Debug, Default)]
struct SubscriptionStats {
    success_count: u64,
    error_count: u64,
    last_check: Option<DateTime<Utc>>,
    unresolved_error: Option<String>,
    recent_latencies: VecDeque<f64>,
    latency_sum: f64,
    min_latency: Option<f64>,
    max_latency: Option<f64>,
    rate_limit_hits: u64,
    event_distribution: BTreeMap<EventKind, u64>,
    retry_distribution: BTreeMap<u32, u64>,
}

impl SubscriptionStats {
    fn attempts(&self) -> u64 {
        self.success_count + self.error_count
    }

    fn ratio(&self, part: u64) -> Option<f64> {
        match self.attempts() {
            0 => None,
            total => Some(part as f64 / total as f64),
        }
    }
}

/// Aggregates per-subscription health, analytics and the exhaustion alert feed.
pub struct WebhookMonitor {
    stats: RwLock<HashMap<String, Arc<Mutex<SubscriptionStats>>>>,
    alerts: Mutex<VecDeque<Alert>>,
    latency_window: usize,
    alert_capacity: usize,
}

impl WebhookMonitor {
    /// Creates a monitor.
    ///
    /// `latency_window` bounds the rolling response-time average;
    /// `alert_capacity` bounds the alert feed (oldest alerts are evicted).
    pub fn new(latency_window: usize, alert_capacity: usize) -> Self {
        Self {
            stats: RwLock::new(HashMap::new()),
            alerts: Mutex::new(VecDeque::new()),
            latency_window: latency_window.max(1),
            alert_capacity: alert_capacity.max(1),
        }
    }

    /// Records the outcome of one delivery attempt.
    pub async fn record(
        &self,
        subscription_id: &str,
        kind: EventKind,
        attempt: u32,
        outcome: &DeliveryOutcome,
    ) {
        let entry = self.entry(subscription_id).await;
        let mut stats = entry.lock().await;
        let latency = outcome.latency_ms();

        if outcome.success {
            stats.success_count += 1;
            stats.unresolved_error = None;
        } else {
            stats.error_count += 1;
            stats.unresolved_error = Some(
                outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown delivery error".to_string()),
            );
        }
        stats.last_check = Some(outcome.attempted_at);

        stats.recent_latencies.push_back(latency);
        if stats.recent_latencies.len() > self.latency_window {
            stats.recent_latencies.pop_front();
        }
        stats.latency_sum += latency;
        stats.min_latency = Some(stats.min_latency.map_or(latency, |min| min.min(latency)));
        stats.max_latency = Some(stats.max_latency.map_or(latency, |max| max.max(latency)));

        *stats.event_distribution.entry(kind).or_insert(0) += 1;
        *stats.retry_distribution.entry(attempt).or_insert(0) += 1;
    }

    /// Counts a delivery dropped by the rate limiter.
    pub async fn record_rate_limited(&self, subscription_id: &str) {
        let entry = self.entry(subscription_id).await;
        entry.lock().await.rate_limit_hits += 1;
    }

    /// Returns the health snapshot of a subscription.
    pub async fn health(&self, subscription: &Subscription) -> HealthRecord {
        let entry = self.entry(&subscription.id).await;
        let stats = entry.lock().await;

        let status = if !subscription.active {
            HealthStatus::Inactive
        } else if stats.unresolved_error.is_some() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        };

        let response_time_ms = if stats.recent_latencies.is_empty() {
            None
        } else {
            Some(stats.recent_latencies.iter().sum::<f64>() / stats.recent_latencies.len() as f64)
        };

        HealthRecord {
            subscription_id: subscription.id.clone(),
            status,
            last_check: stats.last_check,
            response_time_ms,
            success_count: stats.success_count,
            error_count: stats.error_count,
            success_rate: stats.ratio(stats.success_count),
            last_error: stats.unresolved_error.clone(),
        }
    }

    /// Returns the analytics of a subscription.
    pub async fn analytics(&self, subscription_id: &str) -> AnalyticsRecord {
        let entry = self.entry(subscription_id).await;
        let stats = entry.lock().await;
        let total = stats.attempts();

        AnalyticsRecord {
            subscription_id: subscription_id.to_string(),
            total_events: total,
            success_count: stats.success_count,
            failure_count: stats.error_count,
            min_latency_ms: stats.min_latency,
            avg_latency_ms: (total > 0).then(|| stats.latency_sum / total as f64),
            max_latency_ms: stats.max_latency,
            error_rate: stats.ratio(stats.error_count),
            rate_limit_hits: stats.rate_limit_hits,
            event_distribution: stats.event_distribution.clone(),
            retry_distribution: stats.retry_distribution.clone(),
        }
    }

    /// Raises an alert for an exhausted retry record.
    pub async fn raise_alert(&self, record: &RetryRecord) -> Alert {
        let alert = Alert {
            id: uuid::Uuid::new_v4().to_string(),
            subscription_id: record.subscription_id.clone(),
            event_id: record.event.id.clone(),
            event_kind: record.event.kind,
            attempts: record.attempt,
            last_error: record.last_error.clone(),
            raised_at: Utc::now(),
            record: record.clone(),
        };

        tracing::error!(
            alert_id = %alert.id,
            subscription_id = %alert.subscription_id,
            event_id = %alert.event_id,
            event = %alert.event_kind,
            attempts = alert.attempts,
            error = %alert.last_error,
            "Webhook delivery exhausted all attempts"
        );

        let mut alerts = self.alerts.lock().await;
        alerts.push_back(alert.clone());
        while alerts.len() > self.alert_capacity {
            alerts.pop_front();
        }
        alert
    }

    /// Returns the alert feed, oldest first.
    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().await.iter().cloned().collect()
    }

    /// Returns the alerts of one subscription, oldest first.
    pub async fn alerts_for(&self, subscription_id: &str) -> Vec<Alert> {
        self.alerts
            .lock()
            .await
            .iter()
            .filter(|a| a.subscription_id == subscription_id)
            .cloned()
            .collect()
    }

    /// Removes an alert from the feed. Returns whether it existed.
    pub async fn acknowledge(&self, alert_id: &str) -> bool {
        let mut alerts = self.alerts.lock().await;
        let before = alerts.len();
        alerts.retain(|a| a.id != alert_id);
        alerts.len() != before
    }

    /// Drops all state kept for a subscription.
    pub async fn forget(&self, subscription_id: &str) {
        self.stats.write().await.remove(subscription_id);
        self.alerts
            .lock()
            .await
            .retain(|a| a.subscription_id != subscription_id);
    }

    async fn entry(&self, subscription_id: &str) -> Arc<Mutex<SubscriptionStats>> {
        {
            let stats = self.stats.read().await;
            if let Some(entry) = stats.get(subscription_id) {
                return entry.clone();
            }
        }

        let mut stats = self.stats.write().await;
        stats.entry(subscription_id.to_string()).or_default().clone()
    }
}

impl Default for WebhookMonitor {
    fn default() -> Self {
        Self::new(100, 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::ExponentialBackoff;
    use crate::subscription::NewSubscription;
    use league_events::Event;
    use std::time::Duration;

    fn subscription() -> Subscription {
        Subscription::from_request(NewSubscription::new(
            "https://example.com/hook",
            "secret",
            [EventKind::GameResult, EventKind::TeamUpdate],
        ))
        .unwrap()
    }

    fn ok(ms: u64) -> DeliveryOutcome {
        DeliveryOutcome::success(200, Duration::from_millis(ms))
    }

    fn failed(ms: u64) -> DeliveryOutcome {
        DeliveryOutcome::failure(Some(500), "HTTP 500: boom", Duration::from_millis(ms))
    }

    #[tokio::test]
    async fn test_success_rate_undefined_without_attempts() {
        let monitor = WebhookMonitor::default();
        let sub = subscription();

        let health = monitor.health(&sub).await;
        assert_eq!(health.success_rate, None);
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.response_time_ms, None);

        let analytics = monitor.analytics(&sub.id).await;
        assert_eq!(analytics.error_rate, None);
        assert_eq!(analytics.avg_latency_ms, None);
    }

    #[tokio::test]
    async fn test_counts_rates_and_latency() {
        let monitor = WebhookMonitor::default();
        let sub = subscription();

        monitor.record(&sub.id, EventKind::GameResult, 1, &ok(10)).await;
        monitor.record(&sub.id, EventKind::GameResult, 1, &failed(30)).await;
        monitor.record(&sub.id, EventKind::TeamUpdate, 2, &ok(20)).await;

        let health = monitor.health(&sub).await;
        assert_eq!(health.success_count, 2);
        assert_eq!(health.error_count, 1);
        let rate = health.success_rate.unwrap();
        assert!((rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&rate));
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.response_time_ms, Some(20.0));

        let analytics = monitor.analytics(&sub.id).await;
        assert_eq!(analytics.total_events, 3);
        assert_eq!(analytics.min_latency_ms, Some(10.0));
        assert_eq!(analytics.max_latency_ms, Some(30.0));
        assert_eq!(analytics.avg_latency_ms, Some(20.0));
        assert_eq!(analytics.event_distribution[&EventKind::GameResult], 2);
        assert_eq!(analytics.event_distribution[&EventKind::TeamUpdate], 1);
        assert_eq!(analytics.retry_distribution[&1], 2);
        assert_eq!(analytics.retry_distribution[&2], 1);
    }

    #[tokio::test]
    async fn test_status_tracks_unresolved_error() {
        let monitor = WebhookMonitor::default();
        let mut sub = subscription();

        monitor.record(&sub.id, EventKind::GameResult, 1, &failed(5)).await;
        let health = monitor.health(&sub).await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.last_error.as_deref(), Some("HTTP 500: boom"));

        monitor.record(&sub.id, EventKind::GameResult, 2, &ok(5)).await;
        assert_eq!(monitor.health(&sub).await.status, HealthStatus::Healthy);

        sub.active = false;
        assert_eq!(monitor.health(&sub).await.status, HealthStatus::Inactive);
    }

    #[tokio::test]
    async fn test_rolling_window_forgets_old_latencies() {
        let monitor = WebhookMonitor::new(2, 10);
        let sub = subscription();

        for ms in [100, 10, 20] {
            monitor.record(&sub.id, EventKind::GameResult, 1, &ok(ms)).await;
        }

        assert_eq!(monitor.health(&sub).await.response_time_ms, Some(15.0));
        assert_eq!(monitor.analytics(&sub.id).await.max_latency_ms, Some(100.0));
    }

    #[tokio::test]
    async fn test_rate_limit_hits() {
        let monitor = WebhookMonitor::default();
        monitor.record_rate_limited("sub-1").await;
        monitor.record_rate_limited("sub-1").await;

        let analytics = monitor.analytics("sub-1").await;
        assert_eq!(analytics.rate_limit_hits, 2);
        assert_eq!(analytics.total_events, 0);
    }

    #[tokio::test]
    async fn test_alert_feed_is_bounded_and_acknowledgeable() {
        let monitor = WebhookMonitor::new(10, 2);
        let sub = subscription();
        let strategy = ExponentialBackoff::new();

        let mut raised = Vec::new();
        for _ in 0..3 {
            let event = Event::new(EventKind::GameResult, ());
            let record = RetryRecord::first_failure(&sub, &event, "refused", Utc::now(), &strategy);
            raised.push(monitor.raise_alert(&record).await);
        }

        let alerts = monitor.alerts().await;
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].id, raised[1].id);

        assert!(monitor.acknowledge(&raised[2].id).await);
        assert!(!monitor.acknowledge(&raised[2].id).await);
        assert_eq!(monitor.alerts_for(&sub.id).await.len(), 1);

        monitor.forget(&sub.id).await;
        assert!(monitor.alerts().await.is_empty());
    }
}
