//! Webhook storage trait for persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use league_events::EventKind;

use crate::error::{WebhookError, WebhookResult};
use crate::query::SubscriptionFilter;
use crate::retry::RetryRecord;
use crate::subscription::Subscription;

/// Trait for webhook storage backends.
///
/// Relationships are plain ids: a retry record names its subscription, and
/// subscriptions name the team/player they are scoped to.
#[async_trait]
pub trait WebhookStorage: Send + Sync {
    // ==================== Subscription Operations ====================

    /// Inserts a new subscription.
    async fn insert_subscription(&self, subscription: &Subscription) -> WebhookResult<()>;

    /// Gets a subscription by ID.
    async fn get_subscription(&self, id: &str) -> WebhookResult<Option<Subscription>>;

    /// Lists subscriptions passing a filter, in no particular order.
    async fn list_subscriptions(&self, filter: &SubscriptionFilter) -> WebhookResult<Vec<Subscription>>;

    /// Lists active subscriptions listening to an event kind.
    async fn subscriptions_for(&self, kind: EventKind) -> WebhookResult<Vec<Subscription>>;

    /// Replaces a subscription if the stored version still equals `expected_version`.
    ///
    /// Fails with [`WebhookError::Conflict`] when another writer got there first.
    async fn update_subscription(
        &self,
        subscription: &Subscription,
        expected_version: u64,
    ) -> WebhookResult<()>;

    /// Deletes a subscription. Returns whether it existed.
    async fn delete_subscription(&self, id: &str) -> WebhookResult<bool>;

    // ==================== Retry Operations ====================

    /// Inserts a retry record unless a live one already exists for the same
    /// subscription and event. Returns whether the record was inserted.
    async fn insert_retry(&self, record: &RetryRecord) -> WebhookResult<bool>;

    /// Gets a retry record by ID.
    async fn get_retry(&self, id: &str) -> WebhookResult<Option<RetryRecord>>;

    /// Lists pending records due at `now`, earliest first.
    async fn due_retries(&self, now: DateTime<Utc>, limit: usize) -> WebhookResult<Vec<RetryRecord>>;

    /// Lists the live records of a subscription.
    async fn retries_for_subscription(&self, subscription_id: &str) -> WebhookResult<Vec<RetryRecord>>;

    /// Replaces a retry record.
    async fn update_retry(&self, record: &RetryRecord) -> WebhookResult<()>;

    /// Deletes a retry record. Returns whether it existed.
    async fn delete_retry(&self, id: &str) -> WebhookResult<bool>;

    /// Deletes every retry record of a subscription.
    async fn delete_retries_for_subscription(&self, subscription_id: &str) -> WebhookResult<usize>;
}

#[derive(Default)]
struct SubscriptionTable {
    rows: HashMap<String, Subscription>,
    by_kind: HashMap<EventKind, HashSet<String>>,
}

impl SubscriptionTable {
    fn index(&mut self, subscription: &Subscription) {
        for kind in &subscription.events {
            self.by_kind
                .entry(*kind)
                .or_default()
                .insert(subscription.id.clone());
        }
    }

    fn unindex(&mut self, subscription: &Subscription) {
        for kind in &subscription.events {
            if let Some(ids) = self.by_kind.get_mut(kind) {
                ids.remove(&subscription.id);
            }
        }
    }
}

#[derive(Default)]
struct RetryTable {
    rows: HashMap<String, RetryRecord>,
    /// (subscription id, event id) -> record id
    by_origin: HashMap<(String, String), String>,
}

/// In-memory webhook storage.
#[derive(Default)]
pub struct InMemoryWebhookStorage {
    subscriptions: RwLock<SubscriptionTable>,
    retries: RwLock<RetryTable>,
}

impl InMemoryWebhookStorage {
    /// Creates a new in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookStorage for InMemoryWebhookStorage {
    async fn insert_subscription(&self, subscription: &Subscription) -> WebhookResult<()> {
        let mut table = self.subscriptions.write().await;
        if table.rows.contains_key(&subscription.id) {
            return Err(WebhookError::Storage(format!(
                "subscription {} already exists",
                subscription.id
            )));
        }
        table.index(subscription);
        table.rows.insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: &str) -> WebhookResult<Option<Subscription>> {
        let table = self.subscriptions.read().await;
        Ok(table.rows.get(id).cloned())
    }

    async fn list_subscriptions(&self, filter: &SubscriptionFilter) -> WebhookResult<Vec<Subscription>> {
        let table = self.subscriptions.read().await;
        Ok(table
            .rows
            .values()
            .filter(|s| filter.accepts(s))
            .cloned()
            .collect())
    }

    async fn subscriptions_for(&self, kind: EventKind) -> WebhookResult<Vec<Subscription>> {
        let table = self.subscriptions.read().await;
        let Some(ids) = table.by_kind.get(&kind) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| table.rows.get(id))
            .filter(|s| s.active)
            .cloned()
            .collect())
    }

    async fn update_subscription(
        &self,
        subscription: &Subscription,
        expected_version: u64,
    ) -> WebhookResult<()> {
        let mut table = self.subscriptions.write().await;
        let stored = table
            .rows
            .get(&subscription.id)
            .cloned()
            .ok_or_else(|| WebhookError::NotFound(subscription.id.clone()))?;

        if stored.version != expected_version {
            return Err(WebhookError::Conflict {
                id: subscription.id.clone(),
                expected: expected_version,
                found: stored.version,
            });
        }

        table.unindex(&stored);
        table.index(subscription);
        table.rows.insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn delete_subscription(&self, id: &str) -> WebhookResult<bool> {
        let mut table = self.subscriptions.write().await;
        match table.rows.remove(id) {
            Some(removed) => {
                table.unindex(&removed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_retry(&self, record: &RetryRecord) -> WebhookResult<bool> {
        let mut table = self.retries.write().await;
        let origin = (record.subscription_id.clone(), record.event.id.clone());
        if table.by_origin.contains_key(&origin) {
            return Ok(false);
        }
        table.by_origin.insert(origin, record.id.clone());
        table.rows.insert(record.id.clone(), record.clone());
        Ok(true)
    }

    async fn get_retry(&self, id: &str) -> WebhookResult<Option<RetryRecord>> {
        let table = self.retries.read().await;
        Ok(table.rows.get(id).cloned())
    }

    async fn due_retries(&self, now: DateTime<Utc>, limit: usize) -> WebhookResult<Vec<RetryRecord>> {
        let table = self.retries.read().await;
        let mut due: Vec<RetryRecord> = table
            .rows
            .values()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.next_attempt);
        due.truncate(limit);
        Ok(due)
    }

    async fn retries_for_subscription(&self, subscription_id: &str) -> WebhookResult<Vec<RetryRecord>> {
        let table = self.retries.read().await;
        Ok(table
            .rows
            .values()
            .filter(|r| r.subscription_id == subscription_id)
            .cloned()
            .collect())
    }

    async fn update_retry(&self, record: &RetryRecord) -> WebhookResult<()> {
        let mut table = self.retries.write().await;
        if !table.rows.contains_key(&record.id) {
            return Err(WebhookError::Storage(format!("retry record {} not found", record.id)));
        }
        table.rows.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete_retry(&self, id: &str) -> WebhookResult<bool> {
        let mut table = self.retries.write().await;
        match table.rows.remove(id) {
            Some(removed) => {
                table
                    .by_origin
                    .remove(&(removed.subscription_id, removed.event.id));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_retries_for_subscription(&self, subscription_id: &str) -> WebhookResult<usize> {
        let mut table = self.retries.write().await;
        let before = table.rows.len();
        table.rows.retain(|_, r| r.subscription_id != subscription_id);
        table.by_origin.retain(|(sub, _), _| sub != subscription_id);
        Ok(before - table.rows.len())
    }
}
