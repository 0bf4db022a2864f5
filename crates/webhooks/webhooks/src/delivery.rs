//! Webhook delivery: wire payload, transport seam and the delivery engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use league_events::{Event, EventKind};

use crate::monitor::WebhookMonitor;
use crate::signature::WebhookSigner;
use crate::subscription::Subscription;

/// Longest slice of a non-2xx response body kept in the error text.
pub const MAX_ERROR_BODY: usize = 512;

/// Body POSTed to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPayload {
    /// Event kind.
    pub event: EventKind,
    /// Event payload.
    pub data: Map<String, Value>,
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
    /// Hex HMAC-SHA256 of the compact JSON of `data`.
    pub signature: String,
}

impl DeliveryPayload {
    /// Builds and signs the payload of an event for a subscription.
    pub fn build(subscription: &Subscription, event: &Event) -> Self {
        let signature = WebhookSigner::new(&subscription.secret).sign_data(&event.payload);
        Self {
            event: event.kind,
            data: event.payload.clone(),
            timestamp: event.timestamp,
            signature,
        }
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    /// Whether the subscriber answered 2xx.
    pub success: bool,
    /// HTTP status, if a response arrived.
    pub status_code: Option<u16>,
    /// Time spent waiting for the subscriber.
    pub latency: Duration,
    /// Error text on failure.
    pub error: Option<String>,
    /// When the attempt was made.
    pub attempted_at: DateTime<Utc>,
}

impl DeliveryOutcome {
    /// Creates a successful outcome.
    pub fn success(status_code: u16, latency: Duration) -> Self {
        Self {
            success: true,
            status_code: Some(status_code),
            latency,
            error: None,
            attempted_at: Utc::now(),
        }
    }

    /// Creates a failed outcome.
    pub fn failure(status_code: Option<u16>, error: impl Into<String>, latency: Duration) -> Self {
        Self {
            success: false,
            status_code,
            latency,
            error: Some(error.into()),
            attempted_at: Utc::now(),
        }
    }

    /// Latency in fractional milliseconds.
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }

    /// Error text, or a placeholder for failures that carried none.
    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown delivery error")
    }
}

/// Performs one delivery attempt.
///
/// Implementations never fail: every problem is folded into the outcome.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Delivers an event to a subscription once.
    async fn attempt(&self, subscription: &Subscription, event: &Event) -> DeliveryOutcome;
}

/// HTTP transport backed by reqwest.
#[cfg(feature = "http-client")]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

#[cfg(feature = "http-client")]
impl HttpTransport {
    /// Creates a transport with a per-request timeout.
    pub fn new(timeout: Duration, user_agent: &str) -> crate::WebhookResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| crate::WebhookError::Config(e.to_string()))?;
        Ok(Self { client, timeout })
    }
}

#[cfg(feature = "http-client")]
#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn attempt(&self, subscription: &Subscription, event: &Event) -> DeliveryOutcome {
        let start = std::time::Instant::now();
        let payload = DeliveryPayload::build(subscription, event);

        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => {
                return DeliveryOutcome::failure(None, format!("failed to encode payload: {e}"), start.elapsed());
            }
        };

        let response = self
            .client
            .post(&subscription.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("X-Webhook-Event", event.kind.as_str())
            .header("X-Webhook-Signature", &payload.signature)
            .header("X-Webhook-Id", &event.id)
            .body(body)
            .send()
            .await;
        let latency = start.elapsed();

        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    DeliveryOutcome::success(status.as_u16(), latency)
                } else {
                    let body = resp.text().await.unwrap_or_default();
                    DeliveryOutcome::failure(
                        Some(status.as_u16()),
                        format!("HTTP {}: {}", status.as_u16(), truncate(&body, MAX_ERROR_BODY)),
                        latency,
                    )
                }
            }
            Err(e) if e.is_timeout() => DeliveryOutcome::failure(
                None,
                format!("request timed out after {}ms", self.timeout.as_millis()),
                latency,
            ),
            Err(e) => DeliveryOutcome::failure(None, e.to_string(), latency),
        }
    }
}

/// Cuts a string to at most `max` bytes on a character boundary.
fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Runs attempts through a transport under a global in-flight cap and feeds
/// every outcome to the monitor.
pub struct DeliveryEngine {
    transport: Arc<dyn DeliveryTransport>,
    monitor: Arc<WebhookMonitor>,
    permits: Semaphore,
}

impl DeliveryEngine {
    /// Creates an engine allowing at most `max_in_flight` concurrent attempts.
    pub fn new(
        transport: Arc<dyn DeliveryTransport>,
        monitor: Arc<WebhookMonitor>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            transport,
            monitor,
            permits: Semaphore::new(max_in_flight.max(1)),
        }
    }

    /// Makes attempt number `attempt` to deliver an event.
    pub async fn deliver(&self, subscription: &Subscription, event: &Event, attempt: u32) -> DeliveryOutcome {
        let Ok(_permit) = self.permits.acquire().await else {
            return DeliveryOutcome::failure(None, "delivery engine closed", Duration::ZERO);
        };

        let outcome = self.transport.attempt(subscription, event).await;
        self.monitor
            .record(&subscription.id, event.kind, attempt, &outcome)
            .await;

        if outcome.success {
            tracing::info!(
                subscription_id = %subscription.id,
                event_id = %event.id,
                event = %event.kind,
                attempt,
                status = ?outcome.status_code,
                latency_ms = outcome.latency_ms(),
                "Webhook delivered"
            );
        } else {
            tracing::warn!(
                subscription_id = %subscription.id,
                event_id = %event.id,
                event = %event.kind,
                attempt,
                status = ?outcome.status_code,
                error = %outcome.error_text(),
                "Webhook delivery failed"
            );
        }

        outcome
    }

    /// Returns the monitor outcomes are recorded into.
    pub fn monitor(&self) -> &Arc<WebhookMonitor> {
        &self.monitor
    }
}
