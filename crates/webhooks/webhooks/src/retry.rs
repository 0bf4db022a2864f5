//! Retry bookkeeping and backoff for failed deliveries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use league_events::Event;

use crate::subscription::Subscription;

/// Trait for backoff strategies.
pub trait RetryStrategy: Send + Sync {
    /// Returns the delay to wait after the given failed attempt (1-based).
    fn delay(&self, base: Duration, attempt: u32) -> Duration;
}

/// Exponential backoff: `base * 2^(attempt - 1)`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Maximum delay cap.
    pub max_delay: Duration,
}

impl ExponentialBackoff {
    /// Creates a new exponential backoff strategy with a one hour cap.
    pub fn new() -> Self {
        Self {
            max_delay: Duration::from_secs(3600),
        }
    }

    /// Sets the maximum delay.
    pub fn max_delay(mut self, max: Duration) -> Self {
        self.max_delay = max;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn delay(&self, base: Duration, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = base.saturating_mul(1_u32 << exponent);
        std::cmp::min(delay, self.max_delay)
    }
}

/// Lifecycle of a retry record. `Delivered` records are deleted, so only the
/// two stored states exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryState {
    /// Waiting for `next_attempt`.
    Pending,
    /// Attempts used up; terminal.
    Exhausted,
}

/// Bookkeeping for a failed delivery awaiting reattempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRecord {
    /// Record ID.
    pub id: String,
    /// Subscription the delivery belongs to.
    pub subscription_id: String,
    /// Snapshot of the event being delivered.
    pub event: Event,
    /// Attempts made so far.
    pub attempt: u32,
    /// When the last attempt was made.
    pub last_attempt: DateTime<Utc>,
    /// When the next attempt is due.
    pub next_attempt: DateTime<Utc>,
    /// Error from the last attempt.
    pub last_error: String,
    /// Current state.
    pub state: RetryState,
    /// When the first attempt failed.
    pub created_at: DateTime<Utc>,
}

impl RetryRecord {
    /// Creates the record for a first failed attempt.
    ///
    /// With `retry_count == 1` the record is born exhausted.
    pub fn first_failure(
        subscription: &Subscription,
        event: &Event,
        error: impl Into<String>,
        now: DateTime<Utc>,
        strategy: &dyn RetryStrategy,
    ) -> Self {
        let mut record = Self {
            id: uuid::Uuid::new_v4().to_string(),
            subscription_id: subscription.id.clone(),
            event: event.clone(),
            attempt: 0,
            last_attempt: now,
            next_attempt: now,
            last_error: String::new(),
            state: RetryState::Pending,
            created_at: now,
        };
        record.record_failure(subscription, error, now, strategy);
        record
    }

    /// Books another failed attempt and schedules the next one, or marks the
    /// record exhausted once `retry_count` attempts have been made.
    pub fn record_failure(
        &mut self,
        subscription: &Subscription,
        error: impl Into<String>,
        now: DateTime<Utc>,
        strategy: &dyn RetryStrategy,
    ) {
        self.attempt += 1;
        self.last_attempt = now;
        self.last_error = error.into();

        if self.attempt >= subscription.retry_count {
            self.state = RetryState::Exhausted;
            return;
        }

        let base = Duration::from_secs(u64::from(subscription.retry_delay));
        let delay = strategy.delay(base, self.attempt);
        self.next_attempt = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    /// Checks if the record should be retried at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == RetryState::Pending && self.next_attempt <= now
    }

    /// Checks if the record is terminal.
    pub fn is_exhausted(&self) -> bool {
        self.state == RetryState::Exhausted
    }
}
