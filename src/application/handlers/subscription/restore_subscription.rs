//! RestoreSubscriptionHandler - returns a trashed subscription to the
//! status it had before.

use std::sync::Arc;

use crate::application::{BillingError, SubscriptionLifecycle};
use crate::domain::foundation::{SubscriptionId, Timestamp};
use crate::domain::subscription::{ActivityType, Notification, Subscription, SubscriptionStatus};

#[derive(Debug, Clone)]
pub struct RestoreSubscriptionCommand {
    pub subscription_id: SubscriptionId,
}

#[derive(Debug, Clone)]
pub struct RestoreSubscriptionResult {
    pub subscription: Subscription,
    pub restored_to: SubscriptionStatus,
}

pub struct RestoreSubscriptionHandler {
    lifecycle: Arc<SubscriptionLifecycle>,
}

impl RestoreSubscriptionHandler {
    pub fn new(lifecycle: Arc<SubscriptionLifecycle>) -> Self {
        Self { lifecycle }
    }

    pub async fn handle(
        &self,
        cmd: RestoreSubscriptionCommand,
    ) -> Result<RestoreSubscriptionResult, BillingError> {
        let id = cmd.subscription_id;
        let _guard = self.lifecycle.lock(&id).await?;
        let mut subscription = self.lifecycle.load(&id).await?;
        let now = Timestamp::now();

        let restored_to = subscription.restore_from_trash(now)?;
        self.lifecycle
            .commit(
                &mut subscription,
                Some((
                    ActivityType::Restore,
                    format!("Restored from trash to {}", restored_to),
                )),
                vec![Notification::StatusChanged {
                    subscription_id: id,
                    old: SubscriptionStatus::Trash,
                    new: restored_to,
                    reason: "restored from trash".to_string(),
                }],
                now,
            )
            .await?;

        tracing::info!(subscription_id = %id, status = %restored_to, "Subscription restored");
        Ok(RestoreSubscriptionResult {
            subscription,
            restored_to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::subscription::GetSubscriptionQuery;
    use crate::application::test_harness::Harness;
    use crate::domain::subscription::NotificationKind;

    #[tokio::test]
    async fn restore_returns_to_previous_status() {
        let h = Harness::new();
        let sub = h.active_subscription("2024-01-01T00:00:00Z").await;
        h.services
            .lifecycle
            .apply_transition(&sub.id, SubscriptionStatus::OnHold, "hold")
            .await
            .unwrap();
        h.services
            .lifecycle
            .apply_transition(&sub.id, SubscriptionStatus::Trash, "trashed")
            .await
            .unwrap();

        let result = h
            .services
            .subscriptions
            .restore
            .handle(RestoreSubscriptionCommand {
                subscription_id: sub.id,
            })
            .await
            .unwrap();

        assert_eq!(result.restored_to, SubscriptionStatus::OnHold);
        assert_eq!(result.subscription.status, SubscriptionStatus::OnHold);
        let view = h
            .services
            .subscriptions
            .get
            .handle(GetSubscriptionQuery::with_history(sub.id))
            .await
            .unwrap();
        assert!(view.history.iter().any(|n| n.activity == ActivityType::Restore));
        assert_eq!(h.bus.count_of_kind(NotificationKind::StatusChanged), 3);
    }

    #[tokio::test]
    async fn restore_requires_trash() {
        let h = Harness::new();
        let sub = h.active_subscription("2024-01-01T00:00:00Z").await;

        let err = h
            .services
            .subscriptions
            .restore
            .handle(RestoreSubscriptionCommand {
                subscription_id: sub.id,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::ValidationFailed { .. }));
    }
}
