//! Subscription registry: validated CRUD over the storage backend.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use league_events::Event;

use crate::error::{WebhookError, WebhookResult};
use crate::query::ListQuery;
use crate::storage::WebhookStorage;
use crate::subscription::{NewSubscription, Subscription, SubscriptionPatch};

/// How many times a write is re-applied after losing a version race.
const MAX_WRITE_ATTEMPTS: usize = 5;

/// Registry of webhook subscriptions.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    storage: Arc<dyn WebhookStorage>,
}

impl SubscriptionRegistry {
    /// Creates a registry over a storage backend.
    pub fn new(storage: Arc<dyn WebhookStorage>) -> Self {
        Self { storage }
    }

    /// Registers a new subscription.
    pub async fn create(&self, request: NewSubscription) -> WebhookResult<Subscription> {
        let subscription = Subscription::from_request(request)?;
        self.storage.insert_subscription(&subscription).await?;
        tracing::info!(
            subscription_id = %subscription.id,
            url = %subscription.url,
            events = subscription.events.len(),
            "Registered webhook subscription"
        );
        Ok(subscription)
    }

    /// Gets a subscription by ID.
    pub async fn get(&self, id: &str) -> WebhookResult<Subscription> {
        self.storage
            .get_subscription(id)
            .await?
            .ok_or_else(|| WebhookError::NotFound(id.to_string()))
    }

    /// Lists subscriptions.
    pub async fn list(&self, query: &ListQuery) -> WebhookResult<Vec<Subscription>> {
        let subscriptions = self.storage.list_subscriptions(&query.filter).await?;
        Ok(query.arrange(subscriptions))
    }

    /// Applies a partial update.
    pub async fn update(&self, id: &str, patch: SubscriptionPatch) -> WebhookResult<Subscription> {
        let updated = self
            .modify(id, |subscription| subscription.apply(patch.clone()))
            .await?;
        tracing::info!(subscription_id = %id, version = updated.version, "Updated webhook subscription");
        Ok(updated)
    }

    /// Soft-disables a subscription; it stays registered but receives nothing.
    pub async fn disable(&self, id: &str) -> WebhookResult<Subscription> {
        let updated = self
            .modify(id, |subscription| {
                subscription.active = false;
                Ok(())
            })
            .await?;
        tracing::info!(subscription_id = %id, "Disabled webhook subscription");
        Ok(updated)
    }

    /// Hard-deletes a subscription along with its pending retries.
    pub async fn delete(&self, id: &str) -> WebhookResult<()> {
        if !self.storage.delete_subscription(id).await? {
            return Err(WebhookError::NotFound(id.to_string()));
        }
        let dropped = self.storage.delete_retries_for_subscription(id).await?;
        tracing::info!(subscription_id = %id, dropped_retries = dropped, "Deleted webhook subscription");
        Ok(())
    }

    /// Lists the active subscriptions that should receive an event.
    pub async fn matching(&self, event: &Event) -> WebhookResult<Vec<Subscription>> {
        let candidates = self.storage.subscriptions_for(event.kind).await?;
        Ok(candidates.into_iter().filter(|s| s.matches(event)).collect())
    }

    /// Stores the latest delivery error.
    pub async fn record_failure(&self, id: &str, error: &str) -> WebhookResult<Subscription> {
        self.modify(id, |subscription| {
            subscription.last_error = Some(error.to_string());
            Ok(())
        })
        .await
    }

    /// Stamps a retry attempt, with its error if it failed.
    pub async fn record_retry(
        &self,
        id: &str,
        at: DateTime<Utc>,
        error: Option<&str>,
    ) -> WebhookResult<Subscription> {
        self.modify(id, |subscription| {
            subscription.last_retry = Some(at);
            if let Some(error) = error {
                subscription.last_error = Some(error.to_string());
            }
            Ok(())
        })
        .await
    }

    /// Stamps a completed verification handshake.
    pub async fn mark_verified(&self, id: &str, at: DateTime<Utc>) -> WebhookResult<Subscription> {
        self.modify(id, |subscription| {
            subscription.verified_at = Some(at);
            Ok(())
        })
        .await
    }

    /// Returns the storage backend.
    pub fn storage(&self) -> &Arc<dyn WebhookStorage> {
        &self.storage
    }

    /// Read-modify-write with optimistic versioning. The change is re-applied
    /// to a fresh copy whenever another writer bumped the version first.
    async fn modify<F>(&self, id: &str, mut change: F) -> WebhookResult<Subscription>
    where
        F: FnMut(&mut Subscription) -> WebhookResult<()>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut subscription = self.get(id).await?;
            let expected = subscription.version;

            change(&mut subscription)?;
            subscription.touch();

            match self.storage.update_subscription(&subscription, expected).await {
                Ok(()) => return Ok(subscription),
                Err(WebhookError::Conflict { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::debug!(subscription_id = %id, attempt, "Version conflict, retrying write");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
