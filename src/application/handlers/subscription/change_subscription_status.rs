//! ChangeSubscriptionStatusHandler - manual status changes by operators or
//! the customer.

use std::sync::Arc;

use crate::application::{BillingError, SubscriptionLifecycle};
use crate::domain::foundation::{SubscriptionId, Timestamp};
use crate::domain::subscription::{Subscription, SubscriptionStatus};

#[derive(Debug, Clone)]
pub struct ChangeSubscriptionStatusCommand {
    pub subscription_id: SubscriptionId,
    pub target: SubscriptionStatus,
    /// Recorded on the activity note and the status notification.
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ChangeSubscriptionStatusResult {
    pub subscription: Subscription,
    pub previous: SubscriptionStatus,
}

pub struct ChangeSubscriptionStatusHandler {
    lifecycle: Arc<SubscriptionLifecycle>,
}

impl ChangeSubscriptionStatusHandler {
    pub fn new(lifecycle: Arc<SubscriptionLifecycle>) -> Self {
        Self { lifecycle }
    }

    pub async fn handle(
        &self,
        cmd: ChangeSubscriptionStatusCommand,
    ) -> Result<ChangeSubscriptionStatusResult, BillingError> {
        let _guard = self.lifecycle.lock(&cmd.subscription_id).await?;
        let mut subscription = self.lifecycle.load(&cmd.subscription_id).await?;
        let previous = self
            .lifecycle
            .transition(&mut subscription, cmd.target, &cmd.reason, Timestamp::now())
            .await?;
        Ok(ChangeSubscriptionStatusResult {
            subscription,
            previous,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_harness::Harness;
    use crate::domain::subscription::NotificationKind;

    #[tokio::test]
    async fn change_status_reports_previous_status() {
        let h = Harness::new();
        let sub = h.active_subscription("2024-01-01T00:00:00Z").await;
        h.bus.clear();

        let result = h
            .services
            .subscriptions
            .change_status
            .handle(ChangeSubscriptionStatusCommand {
                subscription_id: sub.id,
                target: SubscriptionStatus::OnHold,
                reason: "customer request".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(result.previous, SubscriptionStatus::Active);
        assert_eq!(result.subscription.status, SubscriptionStatus::OnHold);
        assert_eq!(h.bus.count_of_kind(NotificationKind::StatusChanged), 1);
    }

    #[tokio::test]
    async fn change_status_rejects_illegal_transition() {
        let h = Harness::new();
        let sub = h.active_subscription("2024-01-01T00:00:00Z").await;

        let err = h
            .services
            .subscriptions
            .change_status
            .handle(ChangeSubscriptionStatusCommand {
                subscription_id: sub.id,
                target: SubscriptionStatus::Pending,
                reason: "back to pending".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::InvalidTransition { .. }));
        assert_eq!(h.subscription(&sub.id).await.status, SubscriptionStatus::Active);
    }
}
