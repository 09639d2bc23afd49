//! CreateSubscriptionHandler - creates a subscription from its originating
//! order.

use std::sync::Arc;

use crate::application::{BillingError, SubscriptionLifecycle};
use crate::domain::foundation::Timestamp;
use crate::domain::subscription::{
    ActivityType, NewSubscription, OrderRelation, RelationType, Subscription,
};
use crate::ports::SubscriptionLedger;

#[derive(Debug, Clone)]
pub struct CreateSubscriptionCommand {
    pub params: NewSubscription,
}

#[derive(Debug, Clone)]
pub struct CreateSubscriptionResult {
    pub subscription: Subscription,
    /// The `new` relation to the originating order.
    pub relation: OrderRelation,
}

pub struct CreateSubscriptionHandler {
    lifecycle: Arc<SubscriptionLifecycle>,
    ledger: Arc<dyn SubscriptionLedger>,
}

impl CreateSubscriptionHandler {
    pub fn new(lifecycle: Arc<SubscriptionLifecycle>, ledger: Arc<dyn SubscriptionLedger>) -> Self {
        Self { lifecycle, ledger }
    }

    pub async fn handle(
        &self,
        cmd: CreateSubscriptionCommand,
    ) -> Result<CreateSubscriptionResult, BillingError> {
        let now = Timestamp::now();
        let order_id = cmd.params.order_id;
        let order_item_id = cmd.params.order_item_id;

        // 1. Validate and build the aggregate
        let subscription = Subscription::create(cmd.params, now)?;

        // 2. Persist it together with its originating relation
        let relation = OrderRelation {
            subscription_id: subscription.id,
            order_id,
            order_item_id,
            relation_type: RelationType::New,
            created_at: now,
        };
        self.ledger.insert(&subscription, &relation).await?;

        // 3. Record the activity note
        let first_renewal = subscription
            .next_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "not scheduled".to_string());
        self.lifecycle
            .note(
                &subscription.id,
                ActivityType::Created,
                format!(
                    "Subscription created as {} from order {}, first renewal {}",
                    subscription.status, order_id, first_renewal
                ),
                now,
            )
            .await;

        tracing::info!(
            subscription_id = %subscription.id,
            order_id = %order_id,
            status = %subscription.status,
            "Subscription created"
        );
        Ok(CreateSubscriptionResult {
            subscription,
            relation,
        })
    }
}
