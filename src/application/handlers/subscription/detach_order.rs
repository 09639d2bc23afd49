//! DetachOrderHandler - removes the relations an external order deletion
//! leaves behind.

use std::sync::Arc;

use crate::application::BillingError;
use crate::domain::foundation::OrderId;
use crate::ports::SubscriptionLedger;

#[derive(Debug, Clone)]
pub struct DetachOrderCommand {
    pub order_id: OrderId,
}

#[derive(Debug, Clone)]
pub struct DetachOrderResult {
    /// Relations removed across all subscriptions.
    pub removed: u64,
}

pub struct DetachOrderHandler {
    ledger: Arc<dyn SubscriptionLedger>,
}

impl DetachOrderHandler {
    pub fn new(ledger: Arc<dyn SubscriptionLedger>) -> Self {
        Self { ledger }
    }

    pub async fn handle(&self, cmd: DetachOrderCommand) -> Result<DetachOrderResult, BillingError> {
        let removed = self.ledger.detach_order(&cmd.order_id).await?;
        tracing::info!(order_id = %cmd.order_id, removed, "Order detached from subscriptions");
        Ok(DetachOrderResult { removed })
    }
}
