//! GetSubscriptionHandler - loads a subscription with its order relations
//! and, on request, its activity history.

use std::sync::Arc;

use crate::application::{BillingError, SubscriptionLifecycle};
use crate::domain::foundation::SubscriptionId;
use crate::domain::subscription::{OrderRelation, Subscription, SubscriptionNote};
use crate::ports::SubscriptionLedger;

#[derive(Debug, Clone)]
pub struct GetSubscriptionQuery {
    pub subscription_id: SubscriptionId,
    pub include_history: bool,
}

impl GetSubscriptionQuery {
    pub fn new(subscription_id: SubscriptionId) -> Self {
        Self {
            subscription_id,
            include_history: false,
        }
    }

    pub fn with_history(subscription_id: SubscriptionId) -> Self {
        Self {
            subscription_id,
            include_history: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GetSubscriptionResult {
    pub subscription: Subscription,
    pub relations: Vec<OrderRelation>,
    /// Empty unless the query asked for history.
    pub history: Vec<SubscriptionNote>,
}

pub struct GetSubscriptionHandler {
    lifecycle: Arc<SubscriptionLifecycle>,
    ledger: Arc<dyn SubscriptionLedger>,
}

impl GetSubscriptionHandler {
    pub fn new(lifecycle: Arc<SubscriptionLifecycle>, ledger: Arc<dyn SubscriptionLedger>) -> Self {
        Self { lifecycle, ledger }
    }

    pub async fn handle(
        &self,
        query: GetSubscriptionQuery,
    ) -> Result<GetSubscriptionResult, BillingError> {
        let id = query.subscription_id;
        let subscription = self.lifecycle.load(&id).await?;
        let relations = self.ledger.relations_for(&id).await?;
        let history = if query.include_history {
            self.ledger.notes_for(&id).await?
        } else {
            Vec::new()
        };
        Ok(GetSubscriptionResult {
            subscription,
            relations,
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_harness::Harness;

    #[tokio::test]
    async fn history_is_loaded_only_on_request() {
        let h = Harness::new();
        let sub = h.active_subscription("2024-01-01T00:00:00Z").await;
        let get = &h.services.subscriptions.get;

        let plain = get.handle(GetSubscriptionQuery::new(sub.id)).await.unwrap();
        let full = get
            .handle(GetSubscriptionQuery::with_history(sub.id))
            .await
            .unwrap();

        assert_eq!(plain.subscription.id, sub.id);
        assert_eq!(plain.relations.len(), 1);
        assert!(plain.history.is_empty());
        assert!(!full.history.is_empty());
    }

    #[tokio::test]
    async fn unknown_subscription_is_not_found() {
        let h = Harness::new();

        let err = h
            .services
            .subscriptions
            .get
            .handle(GetSubscriptionQuery::new(SubscriptionId::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::SubscriptionNotFound(_)));
    }
}
