//! SubscriptionLifecycle - the single writer of subscription state.
//!
//! Every status change, payment record and suspension is validated by the
//! state machine, persisted with an optimistic version check, logged as a
//! history note and then announced on the notification bus. Callers that
//! already hold the subscription lock use `transition`/`commit`; everyone
//! else goes through `apply_transition`, which takes the lock itself.

use std::sync::Arc;

use crate::domain::foundation::{ErrorCode, SubscriptionId, Timestamp};
use crate::domain::subscription::{
    ActivityType, Notification, Subscription, SubscriptionNote, SubscriptionStatus,
};
use crate::ports::{
    NotificationPublisher, SubscriptionLedger, SubscriptionLock, SubscriptionLockGuard,
};

use super::BillingError;

pub struct SubscriptionLifecycle {
    ledger: Arc<dyn SubscriptionLedger>,
    locks: Arc<dyn SubscriptionLock>,
    publisher: Arc<dyn NotificationPublisher>,
}

impl SubscriptionLifecycle {
    pub fn new(
        ledger: Arc<dyn SubscriptionLedger>,
        locks: Arc<dyn SubscriptionLock>,
        publisher: Arc<dyn NotificationPublisher>,
    ) -> Self {
        Self {
            ledger,
            locks,
            publisher,
        }
    }

    pub async fn lock(&self, id: &SubscriptionId) -> Result<SubscriptionLockGuard, BillingError> {
        Ok(self.locks.acquire(id).await?)
    }

    /// Non-blocking variant for background jobs: `None` means another
    /// worker holds the subscription and this one should move on.
    pub async fn try_lock(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<SubscriptionLockGuard>, BillingError> {
        Ok(self.locks.try_acquire(id).await?)
    }

    pub async fn load(&self, id: &SubscriptionId) -> Result<Subscription, BillingError> {
        self.ledger
            .find_by_id(id)
            .await?
            .ok_or_else(|| BillingError::subscription_not_found(*id))
    }

    /// Manually or externally requested status change.
    pub async fn apply_transition(
        &self,
        id: &SubscriptionId,
        target: SubscriptionStatus,
        reason: &str,
    ) -> Result<Subscription, BillingError> {
        let _guard = self.lock(id).await?;
        let mut subscription = self.load(id).await?;
        self.transition(&mut subscription, target, reason, Timestamp::now())
            .await?;
        Ok(subscription)
    }

    /// Validates and persists a status change on a subscription loaded
    /// under the lock. Returns the previous status.
    pub async fn transition(
        &self,
        subscription: &mut Subscription,
        target: SubscriptionStatus,
        reason: &str,
        now: Timestamp,
    ) -> Result<SubscriptionStatus, BillingError> {
        let old = subscription.status;
        let notifications = Self::stage_transition(subscription, target, reason, now)?;
        let note = format!("Status changed from {} to {}: {}", old, target, reason);
        self.commit(
            subscription,
            Some((ActivityType::StatusChange, note)),
            notifications,
            now,
        )
        .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            from = %old,
            to = %target,
            reason,
            "Subscription status changed"
        );
        Ok(old)
    }

    /// Applies a status change in memory and returns the notifications it
    /// owes, without persisting. Lets callers fold a transition into a
    /// larger write (payment success, suspension).
    pub fn stage_transition(
        subscription: &mut Subscription,
        target: SubscriptionStatus,
        reason: &str,
        now: Timestamp,
    ) -> Result<Vec<Notification>, BillingError> {
        let old = subscription.status;
        subscription
            .change_status(target, now)
            .map_err(|_| BillingError::invalid_transition(old, target))?;

        let mut notifications = vec![Notification::StatusChanged {
            subscription_id: subscription.id,
            old,
            new: target,
            reason: reason.to_string(),
        }];
        match target {
            SubscriptionStatus::Active
                if matches!(
                    old,
                    SubscriptionStatus::Cancelled | SubscriptionStatus::PendingCancel
                ) =>
            {
                notifications.push(Notification::Resumed {
                    subscription_id: subscription.id,
                });
            }
            SubscriptionStatus::Cancelled => notifications.push(Notification::Cancelled {
                subscription_id: subscription.id,
            }),
            _ => {}
        }
        Ok(notifications)
    }

    /// Persists `subscription`, appends the note and publishes.
    ///
    /// On success the in-memory version is advanced to match storage so
    /// the same value can be committed again under the same lock.
    pub async fn commit(
        &self,
        subscription: &mut Subscription,
        note: Option<(ActivityType, String)>,
        notifications: Vec<Notification>,
        now: Timestamp,
    ) -> Result<(), BillingError> {
        self.ledger.update(subscription).await.map_err(|e| {
            if e.code == ErrorCode::ConcurrentModification {
                BillingError::ConcurrentModification(subscription.id)
            } else {
                BillingError::from(e)
            }
        })?;
        subscription.version += 1;

        if let Some((activity, message)) = note {
            self.note(&subscription.id, activity, message, now).await;
        }
        self.publish(notifications).await;
        Ok(())
    }

    /// History notes are best effort once the state itself is stored.
    pub async fn note(
        &self,
        id: &SubscriptionId,
        activity: ActivityType,
        message: impl Into<String>,
        now: Timestamp,
    ) {
        let note = SubscriptionNote::new(*id, activity, message, now);
        if let Err(e) = self.ledger.append_note(&note).await {
            tracing::warn!(subscription_id = %id, error = %e, "Failed to append subscription note");
        }
    }

    pub async fn publish(&self, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }
        if let Err(e) = self.publisher.publish_all(notifications).await {
            tracing::error!(error = %e, "Failed to publish subscription notifications");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::NotificationBus;
    use crate::adapters::memory::{InMemorySubscriptionLedger, InMemorySubscriptionLock};
    use crate::domain::subscription::test_support::{at, monthly_params};
    use crate::domain::subscription::{NotificationKind, OrderRelation, RelationType};

    struct Fixture {
        lifecycle: SubscriptionLifecycle,
        ledger: Arc<InMemorySubscriptionLedger>,
        bus: Arc<NotificationBus>,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(InMemorySubscriptionLedger::new());
        let bus = Arc::new(NotificationBus::recording());
        let lifecycle = SubscriptionLifecycle::new(
            ledger.clone(),
            Arc::new(InMemorySubscriptionLock::new()),
            bus.clone(),
        );
        Fixture {
            lifecycle,
            ledger,
            bus,
        }
    }

    async fn stored_subscription(ledger: &InMemorySubscriptionLedger) -> Subscription {
        let params = monthly_params(at("2024-01-01T00:00:00Z"));
        let relation_order = params.order_id;
        let relation_item = params.order_item_id;
        let sub = Subscription::create(params, at("2024-01-01T00:00:00Z")).unwrap();
        let relation = OrderRelation {
            subscription_id: sub.id,
            order_id: relation_order,
            order_item_id: relation_item,
            relation_type: RelationType::New,
            created_at: sub.created_at,
        };
        ledger.insert(&sub, &relation).await.unwrap();
        sub
    }

    // ══════════════════════════════════════════════════════════════
    // Transitions
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn valid_transition_persists_notes_and_notifies() {
        let f = fixture();
        let sub = stored_subscription(&f.ledger).await;

        let updated = f
            .lifecycle
            .apply_transition(&sub.id, SubscriptionStatus::OnHold, "customer request")
            .await
            .unwrap();

        assert_eq!(updated.status, SubscriptionStatus::OnHold);
        let stored = f.ledger.find_by_id(&sub.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::OnHold);
        assert_eq!(stored.version, 1);

        let notes = f.ledger.notes_for(&sub.id).await.unwrap();
        assert!(notes
            .iter()
            .any(|n| n.activity == ActivityType::StatusChange && n.message.contains("on_hold")));
        assert_eq!(f.bus.count_of_kind(NotificationKind::StatusChanged), 1);
    }

    #[tokio::test]
    async fn invalid_transition_leaves_state_untouched() {
        let f = fixture();
        let sub = stored_subscription(&f.ledger).await;
        f.lifecycle
            .apply_transition(&sub.id, SubscriptionStatus::Expired, "term over")
            .await
            .unwrap();

        let err = f
            .lifecycle
            .apply_transition(&sub.id, SubscriptionStatus::Active, "try again")
            .await
            .unwrap_err();

        assert_eq!(
            err,
            BillingError::invalid_transition(
                SubscriptionStatus::Expired,
                SubscriptionStatus::Active
            )
        );
        let stored = f.ledger.find_by_id(&sub.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Expired);
        assert_eq!(f.bus.count_of_kind(NotificationKind::StatusChanged), 1);
    }

    #[tokio::test]
    async fn cancelling_emits_cancelled_notification() {
        let f = fixture();
        let sub = stored_subscription(&f.ledger).await;

        f.lifecycle
            .apply_transition(&sub.id, SubscriptionStatus::Cancelled, "customer request")
            .await
            .unwrap();

        assert!(f.bus.has(NotificationKind::Cancelled));
        assert!(!f.bus.has(NotificationKind::Resumed));
    }

    #[tokio::test]
    async fn reactivating_from_pending_cancel_emits_resumed() {
        let f = fixture();
        let sub = stored_subscription(&f.ledger).await;
        f.lifecycle
            .apply_transition(&sub.id, SubscriptionStatus::PendingCancel, "end of term")
            .await
            .unwrap();

        f.lifecycle
            .apply_transition(&sub.id, SubscriptionStatus::Active, "changed mind")
            .await
            .unwrap();

        assert_eq!(f.bus.count_of_kind(NotificationKind::Resumed), 1);
        assert_eq!(f.bus.count_of_kind(NotificationKind::StatusChanged), 2);
    }

    #[tokio::test]
    async fn unknown_subscription_is_not_found() {
        let f = fixture();
        let id = SubscriptionId::new();
        let err = f
            .lifecycle
            .apply_transition(&id, SubscriptionStatus::Cancelled, "x")
            .await
            .unwrap_err();
        assert_eq!(err, BillingError::subscription_not_found(id));
    }

    // ══════════════════════════════════════════════════════════════
    // Commit
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn stale_commit_reports_concurrent_modification() {
        let f = fixture();
        let sub = stored_subscription(&f.ledger).await;
        let mut first = sub.clone();
        let mut second = sub.clone();
        let now = at("2024-01-02T00:00:00Z");

        f.lifecycle.commit(&mut first, None, vec![], now).await.unwrap();
        let err = f.lifecycle.commit(&mut second, None, vec![], now).await.unwrap_err();

        assert_eq!(err, BillingError::ConcurrentModification(sub.id));
    }

    #[tokio::test]
    async fn repeated_commits_under_one_lock_track_the_version() {
        let f = fixture();
        let mut sub = stored_subscription(&f.ledger).await;
        let now = at("2024-01-02T00:00:00Z");

        f.lifecycle.commit(&mut sub, None, vec![], now).await.unwrap();
        f.lifecycle
            .transition(&mut sub, SubscriptionStatus::OnHold, "hold", now)
            .await
            .unwrap();

        assert_eq!(f.ledger.find_by_id(&sub.id).await.unwrap().unwrap().version, 2);
    }
}
