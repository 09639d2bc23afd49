//! DelayedTaskRunner - fires grace-period deadlines and backoff retries.
//!
//! Each pass runs due `GracePeriodEnd` tasks first, so a subscription whose
//! window closed is expired before another retry would charge it, then the
//! due retries, then (at most once a day) the webhook retention purge.

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use crate::domain::foundation::Timestamp;
use crate::ports::{DelayedTaskQueue, WebhookEventRepository};

use super::{BillingError, GracePeriodManager, GraceTaskOutcome, RetryEngine, RetryRunReport};

#[derive(Debug, Clone)]
pub struct TaskRunnerSettings {
    pub poll_interval: Duration,
    /// Grace tasks loaded per pass.
    pub batch_size: u32,
    /// Processed webhook events older than this are deleted.
    pub webhook_retention_days: u32,
}

impl Default for TaskRunnerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            batch_size: 100,
            webhook_retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskRunReport {
    pub grace_expired: usize,
    pub grace_stale: usize,
    pub grace_busy: usize,
    pub retries: RetryRunReport,
    pub webhooks_purged: u64,
    pub errors: usize,
}

pub struct DelayedTaskRunner {
    tasks: Arc<dyn DelayedTaskQueue>,
    grace: Arc<GracePeriodManager>,
    engine: Arc<RetryEngine>,
    webhooks: Arc<dyn WebhookEventRepository>,
    settings: TaskRunnerSettings,
    last_purge: Mutex<Option<Timestamp>>,
}

impl DelayedTaskRunner {
    pub fn new(
        tasks: Arc<dyn DelayedTaskQueue>,
        grace: Arc<GracePeriodManager>,
        engine: Arc<RetryEngine>,
        webhooks: Arc<dyn WebhookEventRepository>,
        settings: TaskRunnerSettings,
    ) -> Self {
        Self {
            tasks,
            grace,
            engine,
            webhooks,
            settings,
            last_purge: Mutex::new(None),
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Delayed task runner stopped");
                        return;
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_once(Timestamp::now()).await {
                        tracing::error!(error = %e, "Delayed task pass failed");
                    }
                }
            }
        }
    }

    pub async fn run_once(&self, now: Timestamp) -> Result<TaskRunReport, BillingError> {
        let mut report = TaskRunReport::default();

        for task in self.tasks.due(now, self.settings.batch_size).await? {
            match self.grace.handle_due(&task, now).await {
                Ok(GraceTaskOutcome::Expired) => report.grace_expired += 1,
                Ok(GraceTaskOutcome::Stale) => report.grace_stale += 1,
                Ok(GraceTaskOutcome::Busy) => report.grace_busy += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(
                        subscription_id = %task.subscription_id,
                        kind = task.kind.as_str(),
                        error = %e,
                        "Delayed task failed"
                    );
                }
            }
        }

        report.retries = self.engine.process_due_retries(now).await?;

        if self.purge_due(now) {
            let cutoff = now.add_days(-(self.settings.webhook_retention_days as i64));
            report.webhooks_purged = self.webhooks.purge_processed_before(cutoff).await?;
            if report.webhooks_purged > 0 {
                tracing::info!(
                    purged = report.webhooks_purged,
                    cutoff = %cutoff,
                    "Purged processed webhook events"
                );
            }
        }
        Ok(report)
    }

    fn purge_due(&self, now: Timestamp) -> bool {
        let mut last = self.last_purge.lock().unwrap_or_else(PoisonError::into_inner);
        let due = last.map_or(true, |at| now >= at.add_days(1));
        if due {
            *last = Some(now);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_harness::Harness;
    use crate::domain::subscription::test_support::at;
    use crate::domain::subscription::SubscriptionStatus;
    use crate::domain::webhook::{NormalizedEvent, WebhookEvent, WebhookEventType};

    #[tokio::test]
    async fn grace_deadline_expires_and_retries_run() {
        let h = Harness::with_grace_days(7);
        let expiring = h.active_subscription("2023-12-01T00:00:00Z").await;
        h.gateway.push_decline("insufficient_funds", "Insufficient funds");
        h.services.scheduler.tick(at("2024-01-01T00:00:00Z")).await.unwrap();

        let report = h
            .services
            .tasks
            .run_once(at("2024-01-08T00:00:00Z"))
            .await
            .unwrap();

        assert_eq!(report.grace_expired, 1);
        // The pending retry was closed by the expiry before the retry pass.
        assert_eq!(report.retries.due, 0);
        assert_eq!(
            h.subscription(&expiring.id).await.status,
            SubscriptionStatus::Expired
        );
    }

    #[tokio::test]
    async fn purge_runs_at_most_daily() {
        let h = Harness::new();
        let old = at("2023-01-01T00:00:00Z");
        let event = NormalizedEvent {
            event_id: "evt_old".into(),
            event_type: WebhookEventType::Other("ping".into()),
            raw_type: "ping".into(),
            subscription_id: None,
            order_id: None,
            transaction_id: None,
            error_code: None,
            error_message: None,
            occurred_at: old,
        };
        let record = WebhookEvent::received("mock", &event, serde_json::json!({}), old);
        h.memory
            .webhook_events
            .claim(&record, chrono::Duration::minutes(5), old)
            .await
            .unwrap();
        h.memory
            .webhook_events
            .mark_processed("mock", "evt_old", None, old)
            .await
            .unwrap();

        let first = h.services.tasks.run_once(at("2024-01-01T00:00:00Z")).await.unwrap();
        let second = h.services.tasks.run_once(at("2024-01-01T01:00:00Z")).await.unwrap();

        assert_eq!(first.webhooks_purged, 1);
        assert_eq!(second.webhooks_purged, 0);
        assert_eq!(h.memory.webhook_events.count().await, 0);
    }

    #[tokio::test]
    async fn idle_pass_is_a_no_op() {
        let h = Harness::new();
        h.active_subscription("2023-12-01T00:00:00Z").await;

        let report = h.services.tasks.run_once(at("2024-01-01T00:00:00Z")).await.unwrap();

        assert_eq!(report.grace_expired, 0);
        assert_eq!(report.retries, RetryRunReport::default());
        assert_eq!(h.gateway.call_count(), 0);
    }
}
