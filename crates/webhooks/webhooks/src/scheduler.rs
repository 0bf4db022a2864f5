//! Background reattempts of failed deliveries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::dispatcher::DeliveryContext;
use crate::error::WebhookResult;
use crate::retry::{RetryRecord, RetryState};
use crate::subscription::Subscription;

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Another sweep was running, so this one did nothing.
    pub skipped: bool,
    /// Records that were due.
    pub due: usize,
    /// Records delivered and removed.
    pub delivered: usize,
    /// Records that failed again and were rescheduled.
    pub rescheduled: usize,
    /// Records that used up their attempts.
    pub exhausted: usize,
    /// Records dropped because their subscription is gone or inactive.
    pub discarded: usize,
    /// Records pushed back until the subscription's rate window frees up.
    pub rate_limited: usize,
}

impl SweepReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }
}

enum Reattempt {
    Delivered,
    Rescheduled,
    Exhausted,
    Discarded,
    RateLimited,
    Errored,
}

/// Periodically reattempts due retry records.
///
/// Sweeps are mutually exclusive: a sweep started while another is running
/// returns immediately, so no record is reattempted twice concurrently.
#[derive(Clone)]
pub struct RetryScheduler {
    context: Arc<DeliveryContext>,
    sweep: Arc<Mutex<()>>,
    batch_size: usize,
}

impl RetryScheduler {
    pub(crate) fn new(context: Arc<DeliveryContext>, batch_size: usize) -> Self {
        Self {
            context,
            sweep: Arc::new(Mutex::new(())),
            batch_size: batch_size.max(1),
        }
    }

    /// Reattempts every record due at `now`, up to the batch size.
    pub async fn process_due(&self, now: DateTime<Utc>) -> WebhookResult<SweepReport> {
        let Ok(_guard) = self.sweep.try_lock() else {
            tracing::debug!("Retry sweep already running, skipping");
            return Ok(SweepReport::skipped());
        };

        let due = self
            .context
            .registry
            .storage()
            .due_retries(now, self.batch_size)
            .await?;
        let mut report = SweepReport {
            due: due.len(),
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for record in due {
            let context = self.context.clone();
            tasks.spawn(async move { reattempt(&context, record, now).await });
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Reattempt::Delivered) => report.delivered += 1,
                Ok(Reattempt::Rescheduled) => report.rescheduled += 1,
                Ok(Reattempt::Exhausted) => report.exhausted += 1,
                Ok(Reattempt::Discarded) => report.discarded += 1,
                Ok(Reattempt::RateLimited) => report.rate_limited += 1,
                Ok(Reattempt::Errored) => {}
                Err(e) => tracing::error!(error = %e, "Retry task panicked"),
            }
        }

        if report.due > 0 {
            tracing::info!(
                due = report.due,
                delivered = report.delivered,
                rescheduled = report.rescheduled,
                exhausted = report.exhausted,
                discarded = report.discarded,
                rate_limited = report.rate_limited,
                "Retry sweep finished"
            );
        }
        Ok(report)
    }

    /// Starts sweeping every `interval` on a background task.
    ///
    /// Can be called again after the returned handle is shut down. A zero
    /// interval is raised to one millisecond.
    pub fn start(&self, interval: Duration) -> SchedulerHandle {
        let interval = interval.max(Duration::from_millis(1));
        let (shutdown, mut stop) = watch::channel(false);
        let scheduler = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_ms = interval.as_millis() as u64, "Retry scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = scheduler.process_due(Utc::now()).await {
                            tracing::error!(error = %e, "Retry sweep failed");
                        }
                    }
                    _ = stop.changed() => break,
                }
            }

            tracing::info!("Retry scheduler stopped");
        });

        SchedulerHandle { shutdown, task }
    }
}

/// Handle to a running scheduler task. Dropping it also stops the task.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops the scheduler and waits for an in-progress sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Retry scheduler task failed");
        }
    }

    /// Checks if the task has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn reattempt(context: &DeliveryContext, mut record: RetryRecord, now: DateTime<Utc>) -> Reattempt {
    let storage = context.registry.storage();

    let subscription = match storage.get_subscription(&record.subscription_id).await {
        Ok(Some(subscription)) if subscription.active => subscription,
        Ok(_) => {
            tracing::info!(
                retry_id = %record.id,
                subscription_id = %record.subscription_id,
                "Discarding retry for missing or inactive subscription"
            );
            if let Err(e) = storage.delete_retry(&record.id).await {
                tracing::error!(retry_id = %record.id, error = %e, "Failed to discard retry");
            }
            return Reattempt::Discarded;
        }
        Err(e) => {
            tracing::error!(retry_id = %record.id, error = %e, "Failed to load subscription for retry");
            return Reattempt::Errored;
        }
    };

    // retry_count may have been lowered since the record was written
    if record.attempt >= subscription.retry_count {
        record.state = RetryState::Exhausted;
        context.exhaust(&record).await;
        return Reattempt::Exhausted;
    }

    if !context.admit(&subscription, &record.event, now).await {
        return defer(context, record, &subscription, now).await;
    }

    let attempt = record.attempt + 1;
    let outcome = context.engine.deliver(&subscription, &record.event, attempt).await;

    if outcome.success {
        if let Err(e) = storage.delete_retry(&record.id).await {
            tracing::error!(retry_id = %record.id, error = %e, "Failed to remove delivered retry");
        }
        if let Err(e) = context.registry.record_retry(&subscription.id, now, None).await {
            tracing::warn!(subscription_id = %subscription.id, error = %e, "Failed to stamp retry");
        }
        return Reattempt::Delivered;
    }

    let error = outcome.error_text().to_string();
    if let Err(e) = context
        .registry
        .record_retry(&subscription.id, now, Some(&error))
        .await
    {
        tracing::warn!(subscription_id = %subscription.id, error = %e, "Failed to stamp retry");
    }

    record.record_failure(&subscription, error, now, context.strategy.as_ref());
    if record.is_exhausted() {
        context.exhaust(&record).await;
        return Reattempt::Exhausted;
    }

    match storage.update_retry(&record).await {
        Ok(()) => {
            tracing::info!(
                retry_id = %record.id,
                attempt = record.attempt,
                next_attempt = %record.next_attempt,
                "Rescheduled webhook retry"
            );
            Reattempt::Rescheduled
        }
        Err(e) => {
            tracing::error!(retry_id = %record.id, error = %e, "Failed to reschedule retry");
            Reattempt::Errored
        }
    }
}

/// Moves a rate-limited record to when its subscription's window next frees
/// a slot, so it leaves the head of the due queue. Attempts are untouched.
async fn defer(
    context: &DeliveryContext,
    mut record: RetryRecord,
    subscription: &Subscription,
    now: DateTime<Utc>,
) -> Reattempt {
    let info = context
        .limiter
        .info(&subscription.id, subscription.rate_limit, now)
        .await;
    record.next_attempt = info
        .frees_at
        .filter(|at| *at > now)
        .unwrap_or_else(|| now + chrono::Duration::seconds(1));

    match context.registry.storage().update_retry(&record).await {
        Ok(()) => {
            tracing::debug!(
                retry_id = %record.id,
                next_attempt = %record.next_attempt,
                "Deferred rate limited retry"
            );
            Reattempt::RateLimited
        }
        Err(e) => {
            tracing::error!(retry_id = %record.id, error = %e, "Failed to defer retry");
            Reattempt::Errored
        }
    }
}
