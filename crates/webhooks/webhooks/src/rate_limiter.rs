//! Rate limiter for webhook subscriptions.
//!
//! Sliding-window log per subscription: a delivery is admitted only if fewer
//! than `rate_limit` deliveries were admitted in the trailing 60 seconds.
//! Each subscription has its own lock, so checks for different subscriptions
//! never serialize.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Length of the rate window in seconds.
pub const RATE_WINDOW_SECS: i64 = 60;

fn rate_window() -> chrono::Duration {
    chrono::Duration::seconds(RATE_WINDOW_SECS)
}

type Window = Arc<Mutex<VecDeque<DateTime<Utc>>>>;

/// Rate limiter for webhook subscriptions.
#[derive(Default)]
pub struct WebhookRateLimiter {
    windows: RwLock<HashMap<String, Window>>,
}

/// Usage of a subscription's current window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    /// Deliveries allowed per window.
    pub limit: u32,
    /// Deliveries admitted in the trailing window.
    pub used: u32,
    /// Deliveries still allowed right now.
    pub remaining: u32,
    /// When the oldest admitted delivery leaves the window.
    pub frees_at: Option<DateTime<Utc>>,
}

impl WebhookRateLimiter {
    /// Creates an empty rate limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a delivery at `now` if the subscription is under `limit` for the
    /// trailing window. Admission is recorded; denials are not.
    pub async fn allow(&self, subscription_id: &str, limit: u32, now: DateTime<Utc>) -> bool {
        let window = self.get_or_create_window(subscription_id).await;
        let mut admitted = window.lock().await;
        prune(&mut admitted, now);

        if admitted.len() >= limit as usize {
            tracing::debug!(
                subscription_id = %subscription_id,
                limit,
                "Rate limit reached"
            );
            return false;
        }

        admitted.push_back(now);
        true
    }

    /// Reports window usage at `now` without admitting anything.
    pub async fn info(&self, subscription_id: &str, limit: u32, now: DateTime<Utc>) -> RateLimitInfo {
        let window = self.windows.read().await.get(subscription_id).cloned();
        let (used, frees_at) = match window {
            Some(window) => {
                let mut admitted = window.lock().await;
                prune(&mut admitted, now);
                (admitted.len() as u32, admitted.front().map(|t| *t + rate_window()))
            }
            None => (0, None),
        };

        RateLimitInfo {
            limit,
            used,
            remaining: limit.saturating_sub(used),
            frees_at,
        }
    }

    /// Drops a subscription's window.
    pub async fn forget(&self, subscription_id: &str) {
        self.windows.write().await.remove(subscription_id);
    }

    async fn get_or_create_window(&self, subscription_id: &str) -> Window {
        {
            let windows = self.windows.read().await;
            if let Some(window) = windows.get(subscription_id) {
                return window.clone();
            }
        }

        let mut windows = self.windows.write().await;
        windows.entry(subscription_id.to_string()).or_default().clone()
    }
}

/// Removes admissions that are 60 seconds old or older.
fn prune(admitted: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
    while admitted.front().is_some_and(|t| *t + rate_window() <= now) {
        admitted.pop_front();
    }
}
