//! GracePeriodManager - keeps unpaid subscriptions alive until a deadline.
//!
//! When a renewal is first missed the window `[due_date, due_date + grace_days)`
//! opens and a `GracePeriodEnd` delayed task is scheduled for its end. A
//! payment inside the window clears it; otherwise the task (or the
//! scheduler, whichever comes first) expires the subscription.

use std::sync::Arc;

use crate::domain::billing::{GraceEvaluation, GracePolicy};
use crate::domain::foundation::{SubscriptionId, Timestamp};
use crate::domain::subscription::{ActivityType, Notification, Subscription, SubscriptionStatus};
use crate::ports::{DelayedTask, DelayedTaskQueue, SubscriptionLedger, TaskKind};

use super::{BillingError, SubscriptionLifecycle};

/// What a fired `GracePeriodEnd` task did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraceTaskOutcome {
    Expired,
    /// The subscription was paid, cancelled or rescheduled meanwhile.
    Stale,
    /// Another worker holds the subscription; the task stays queued.
    Busy,
}

pub struct GracePeriodManager {
    lifecycle: Arc<SubscriptionLifecycle>,
    ledger: Arc<dyn SubscriptionLedger>,
    tasks: Arc<dyn DelayedTaskQueue>,
    policy: GracePolicy,
}

impl GracePeriodManager {
    pub fn new(
        lifecycle: Arc<SubscriptionLifecycle>,
        ledger: Arc<dyn SubscriptionLedger>,
        tasks: Arc<dyn DelayedTaskQueue>,
        policy: GracePolicy,
    ) -> Self {
        Self {
            lifecycle,
            ledger,
            tasks,
            policy,
        }
    }

    pub fn evaluate(&self, subscription: &Subscription, now: Timestamp) -> GraceEvaluation {
        self.policy.evaluate(subscription, now)
    }

    /// Opens the window and schedules its end. Caller holds the lock.
    pub async fn open(
        &self,
        subscription: &mut Subscription,
        grace_end: Timestamp,
        now: Timestamp,
    ) -> Result<(), BillingError> {
        subscription.begin_grace(grace_end, now);
        self.lifecycle
            .commit(
                subscription,
                Some((
                    ActivityType::GracePeriod,
                    format!("Grace period started, ends {}", grace_end),
                )),
                vec![Notification::GracePeriodStarted {
                    subscription_id: subscription.id,
                    grace_end,
                }],
                now,
            )
            .await?;

        self.tasks
            .schedule(&DelayedTask {
                subscription_id: subscription.id,
                kind: TaskKind::GracePeriodEnd,
                run_at: grace_end,
            })
            .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            grace_end = %grace_end,
            "Grace period started"
        );
        Ok(())
    }

    /// Expires an unpaid subscription whose window is over. Caller holds
    /// the lock.
    pub async fn expire(
        &self,
        subscription: &mut Subscription,
        now: Timestamp,
    ) -> Result<(), BillingError> {
        let mut notifications = SubscriptionLifecycle::stage_transition(
            subscription,
            SubscriptionStatus::Expired,
            "grace period ended without payment",
            now,
        )?;
        notifications.push(Notification::GracePeriodEnded {
            subscription_id: subscription.id,
        });

        self.lifecycle
            .commit(
                subscription,
                Some((
                    ActivityType::GracePeriod,
                    "Grace period ended without payment, subscription expired".to_string(),
                )),
                notifications,
                now,
            )
            .await?;
        self.clear(&subscription.id).await?;

        tracing::warn!(
            subscription_id = %subscription.id,
            "Subscription expired after grace period"
        );
        Ok(())
    }

    /// Drops the pending end-of-grace task, if any.
    pub async fn clear(&self, subscription_id: &SubscriptionId) -> Result<(), BillingError> {
        self.tasks
            .cancel(subscription_id, TaskKind::GracePeriodEnd)
            .await?;
        Ok(())
    }

    /// Runs a due `GracePeriodEnd` task.
    ///
    /// Acts only when the subscription is still renewable and its window is
    /// exactly the one the task was scheduled for.
    pub async fn handle_due(
        &self,
        task: &DelayedTask,
        now: Timestamp,
    ) -> Result<GraceTaskOutcome, BillingError> {
        let Some(_guard) = self.lifecycle.try_lock(&task.subscription_id).await? else {
            return Ok(GraceTaskOutcome::Busy);
        };

        let outcome = match self.ledger.find_by_id(&task.subscription_id).await? {
            Some(mut subscription)
                if subscription.status.is_renewable()
                    && subscription.grace_period_end == Some(task.run_at)
                    && now >= task.run_at =>
            {
                self.expire(&mut subscription, now).await?;
                GraceTaskOutcome::Expired
            }
            _ => {
                tracing::debug!(subscription_id = %task.subscription_id, "Stale grace period task");
                GraceTaskOutcome::Stale
            }
        };

        self.tasks.complete(task).await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_harness::Harness;
    use crate::domain::subscription::test_support::at;
    use crate::domain::subscription::NotificationKind;

    fn harness() -> Harness {
        Harness::with_grace_days(7)
    }

    #[tokio::test]
    async fn open_records_window_and_schedules_task() {
        let h = harness();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        let grace_end = at("2024-01-08T00:00:00Z");

        h.services
            .grace
            .open(&mut sub, grace_end, at("2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        assert_eq!(h.subscription(&sub.id).await.grace_period_end, Some(grace_end));
        let task = h
            .memory
            .tasks
            .find(&sub.id, TaskKind::GracePeriodEnd)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.run_at, grace_end);
        assert!(h.bus.has(NotificationKind::GracePeriodStarted));
    }

    #[tokio::test]
    async fn due_task_expires_unpaid_subscription() {
        let h = harness();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        let grace_end = at("2024-01-08T00:00:00Z");
        h.services
            .grace
            .open(&mut sub, grace_end, at("2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        let task = DelayedTask {
            subscription_id: sub.id,
            kind: TaskKind::GracePeriodEnd,
            run_at: grace_end,
        };

        let outcome = h.services.grace.handle_due(&task, grace_end).await.unwrap();

        assert_eq!(outcome, GraceTaskOutcome::Expired);
        let stored = h.subscription(&sub.id).await;
        assert_eq!(stored.status, SubscriptionStatus::Expired);
        assert_eq!(stored.grace_period_end, None);
        assert!(h.bus.has(NotificationKind::GracePeriodEnded));
        assert!(h.memory.tasks.is_empty().await);
    }

    #[tokio::test]
    async fn task_for_a_cleared_window_is_stale() {
        let h = harness();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        let grace_end = at("2024-01-08T00:00:00Z");
        h.services
            .grace
            .open(&mut sub, grace_end, at("2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        // Paid inside the window: the renewal clears grace_period_end.
        sub.record_renewal_payment(at("2024-01-05T00:00:00Z")).unwrap();
        h.services
            .lifecycle
            .commit(&mut sub, None, vec![], at("2024-01-05T00:00:00Z"))
            .await
            .unwrap();

        let task = DelayedTask {
            subscription_id: sub.id,
            kind: TaskKind::GracePeriodEnd,
            run_at: grace_end,
        };
        let outcome = h.services.grace.handle_due(&task, grace_end).await.unwrap();

        assert_eq!(outcome, GraceTaskOutcome::Stale);
        assert_eq!(h.subscription(&sub.id).await.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn busy_subscription_leaves_task_queued() {
        let h = harness();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        let grace_end = at("2024-01-08T00:00:00Z");
        h.services
            .grace
            .open(&mut sub, grace_end, at("2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        let task = DelayedTask {
            subscription_id: sub.id,
            kind: TaskKind::GracePeriodEnd,
            run_at: grace_end,
        };

        let _held = h.services.lifecycle.lock(&sub.id).await.unwrap();
        let outcome = h.services.grace.handle_due(&task, grace_end).await.unwrap();

        assert_eq!(outcome, GraceTaskOutcome::Busy);
        assert_eq!(h.memory.tasks.len().await, 1);
    }
}
