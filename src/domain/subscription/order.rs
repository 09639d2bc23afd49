//! Renewal orders and the append-only order-relation history.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::foundation::{
    Money, OrderId, OrderItemId, SubscriptionId, Timestamp, ValidationError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// The order that created the subscription. Exactly one per subscription.
    New,
    Renew,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::New => "new",
            RelationType::Renew => "renew",
        }
    }
}

impl FromStr for RelationType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(RelationType::New),
            "renew" => Ok(RelationType::Renew),
            other => Err(ValidationError::invalid_format(
                "relation_type",
                format!("unknown relation '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRelation {
    pub subscription_id: SubscriptionId,
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub relation_type: RelationType,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "failed" => Ok(OrderStatus::Failed),
            other => Err(ValidationError::invalid_format(
                "order_status",
                format!("unknown order status '{}'", other),
            )),
        }
    }
}

/// The charge record for one billing period. Retries of the same period
/// reuse the order and bump `attempt_number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalOrder {
    pub id: OrderId,
    pub item_id: OrderItemId,
    pub subscription_id: SubscriptionId,
    pub amount: Money,
    pub status: OrderStatus,
    pub gateway_id: Option<String>,
    /// Gateway's own reference, used to correlate webhooks lacking metadata.
    pub transaction_id: Option<String>,
    pub attempt_number: u32,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub paid_at: Option<Timestamp>,
}

impl RenewalOrder {
    pub fn new(subscription_id: SubscriptionId, amount: Money, now: Timestamp) -> Self {
        Self {
            id: OrderId::new(),
            item_id: OrderItemId::new(),
            subscription_id,
            amount,
            status: OrderStatus::Pending,
            gateway_id: None,
            transaction_id: None,
            attempt_number: 0,
            last_error: None,
            created_at: now,
            paid_at: None,
        }
    }

    pub fn relation(&self) -> OrderRelation {
        OrderRelation {
            subscription_id: self.subscription_id,
            order_id: self.id,
            order_item_id: self.item_id,
            relation_type: RelationType::Renew,
            created_at: self.created_at,
        }
    }

    /// Key sent to the gateway so a repeated call for the same attempt
    /// cannot charge twice.
    pub fn idempotency_key(&self) -> String {
        format!("renewal-{}-{}", self.id, self.attempt_number)
    }

    pub fn is_paid(&self) -> bool {
        self.status == OrderStatus::Paid
    }

    pub fn begin_attempt(&mut self, attempt_number: u32, gateway_id: &str) {
        self.attempt_number = attempt_number;
        self.gateway_id = Some(gateway_id.to_string());
        self.status = OrderStatus::Pending;
    }

    pub fn mark_paid(&mut self, transaction_id: Option<String>, paid_at: Timestamp) {
        self.status = OrderStatus::Paid;
        if transaction_id.is_some() {
            self.transaction_id = transaction_id;
        }
        self.last_error = None;
        self.paid_at = Some(paid_at);
    }

    pub fn mark_failed(&mut self, transaction_id: Option<String>, error: impl Into<String>) {
        self.status = OrderStatus::Failed;
        if transaction_id.is_some() {
            self.transaction_id = transaction_id;
        }
        self.last_error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> RenewalOrder {
        RenewalOrder::new(
            SubscriptionId::new(),
            Money::parse("19.99", "USD").unwrap(),
            Timestamp::now(),
        )
    }

    #[test]
    fn idempotency_key_changes_per_attempt() {
        let mut order = order();
        order.begin_attempt(1, "mock");
        let first = order.idempotency_key();
        order.begin_attempt(2, "mock");
        assert_ne!(first, order.idempotency_key());
        assert!(first.starts_with("renewal-"));
    }

    #[test]
    fn relation_is_a_renewal() {
        let order = order();
        let relation = order.relation();
        assert_eq!(relation.relation_type, RelationType::Renew);
        assert_eq!(relation.order_id, order.id);
    }

    #[test]
    fn mark_paid_keeps_earlier_transaction_id_when_none_given() {
        let mut order = order();
        order.mark_failed(Some("pi_1".into()), "card_declined");
        order.mark_paid(None, Timestamp::now());
        assert!(order.is_paid());
        assert_eq!(order.transaction_id.as_deref(), Some("pi_1"));
        assert!(order.last_error.is_none());
    }
}
