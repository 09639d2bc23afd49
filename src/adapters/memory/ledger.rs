//! In-memory subscription ledger.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, ErrorCode, OrderId, SubscriptionId, Timestamp};
use crate::domain::subscription::{
    OrderRelation, RelationType, RenewalOrder, Subscription, SubscriptionNote,
};
use crate::ports::{DueSubscription, SubscriptionLedger};

#[derive(Default)]
struct LedgerState {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    relations: Vec<OrderRelation>,
    orders: HashMap<OrderId, RenewalOrder>,
    notes: Vec<SubscriptionNote>,
}

/// Ledger kept in process memory. Used by tests and database-less dev runs.
#[derive(Default)]
pub struct InMemorySubscriptionLedger {
    state: RwLock<LedgerState>,
}

impl InMemorySubscriptionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored subscriptions.
    pub async fn len(&self) -> usize {
        self.state.read().await.subscriptions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// All renewal orders for a subscription, oldest first.
    pub async fn orders_for(&self, id: &SubscriptionId) -> Vec<RenewalOrder> {
        let state = self.state.read().await;
        let mut orders: Vec<RenewalOrder> = state
            .orders
            .values()
            .filter(|o| o.subscription_id == *id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }
}

#[async_trait]
impl SubscriptionLedger for InMemorySubscriptionLedger {
    async fn insert(
        &self,
        subscription: &Subscription,
        relation: &OrderRelation,
    ) -> Result<(), DomainError> {
        let mut state = self.state.write().await;
        let has_new = state.relations.iter().any(|r| {
            r.subscription_id == subscription.id && r.relation_type == RelationType::New
        });
        if has_new || relation.relation_type != RelationType::New {
            return Err(DomainError::new(
                ErrorCode::DuplicateOrderRelation,
                "Subscription must have exactly one 'new' order relation",
            ));
        }
        state.subscriptions.insert(subscription.id, subscription.clone());
        state.relations.push(relation.clone());
        Ok(())
    }

    async fn update(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let mut state = self.state.write().await;
        let stored = state
            .subscriptions
            .get_mut(&subscription.id)
            .ok_or_else(|| {
                DomainError::new(ErrorCode::SubscriptionNotFound, "Subscription not found")
            })?;

        if stored.version != subscription.version {
            return Err(DomainError::new(
                ErrorCode::ConcurrentModification,
                format!(
                    "Subscription {} was modified concurrently (expected version {}, found {})",
                    subscription.id, subscription.version, stored.version
                ),
            ));
        }

        let mut next = subscription.clone();
        next.version += 1;
        *stored = next;
        Ok(())
    }

    async fn find_by_id(&self, id: &SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        Ok(self.state.read().await.subscriptions.get(id).cloned())
    }

    async fn find_due(
        &self,
        now: Timestamp,
        after: Option<&DueSubscription>,
        limit: u32,
    ) -> Result<Vec<DueSubscription>, DomainError> {
        let state = self.state.read().await;
        let mut due: Vec<DueSubscription> = state
            .subscriptions
            .values()
            .filter(|s| s.is_due(now))
            .map(|s| DueSubscription {
                due_at: s.due_date(),
                id: s.id,
            })
            .filter(|row| after.map_or(true, |cursor| row > cursor))
            .collect();
        due.sort();
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn delete(&self, id: &SubscriptionId) -> Result<(), DomainError> {
        let mut state = self.state.write().await;
        if state.subscriptions.remove(id).is_none() {
            return Err(DomainError::new(ErrorCode::SubscriptionNotFound, "Subscription not found"));
        }
        state.notes.retain(|n| n.subscription_id != *id);
        state.orders.retain(|_, o| o.subscription_id != *id);
        Ok(())
    }

    async fn append_relation(&self, relation: &OrderRelation) -> Result<(), DomainError> {
        let mut state = self.state.write().await;
        if relation.relation_type == RelationType::New
            && state.relations.iter().any(|r| {
                r.subscription_id == relation.subscription_id
                    && r.relation_type == RelationType::New
            })
        {
            return Err(DomainError::new(
                ErrorCode::DuplicateOrderRelation,
                "Subscription already has a 'new' order relation",
            ));
        }
        state.relations.push(relation.clone());
        Ok(())
    }

    async fn relations_for(&self, id: &SubscriptionId) -> Result<Vec<OrderRelation>, DomainError> {
        let state = self.state.read().await;
        let mut relations: Vec<OrderRelation> = state
            .relations
            .iter()
            .filter(|r| r.subscription_id == *id)
            .cloned()
            .collect();
        relations.sort_by_key(|r| r.created_at);
        Ok(relations)
    }

    async fn detach_order(&self, order_id: &OrderId) -> Result<u64, DomainError> {
        let mut state = self.state.write().await;
        let before = state.relations.len();
        state.relations.retain(|r| r.order_id != *order_id);
        Ok((before - state.relations.len()) as u64)
    }

    async fn save_order(&self, order: &RenewalOrder) -> Result<(), DomainError> {
        self.state.write().await.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_order(&self, id: &OrderId) -> Result<Option<RenewalOrder>, DomainError> {
        Ok(self.state.read().await.orders.get(id).cloned())
    }

    async fn find_order_by_transaction(
        &self,
        gateway_id: &str,
        transaction_id: &str,
    ) -> Result<Option<RenewalOrder>, DomainError> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .find(|o| {
                o.gateway_id.as_deref() == Some(gateway_id)
                    && o.transaction_id.as_deref() == Some(transaction_id)
            })
            .cloned())
    }

    async fn append_note(&self, note: &SubscriptionNote) -> Result<(), DomainError> {
        self.state.write().await.notes.push(note.clone());
        Ok(())
    }

    async fn notes_for(&self, id: &SubscriptionId) -> Result<Vec<SubscriptionNote>, DomainError> {
        Ok(self
            .state
            .read()
            .await
            .notes
            .iter()
            .filter(|n| n.subscription_id == *id)
            .cloned()
            .collect())
    }
}
