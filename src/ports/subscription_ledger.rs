//! SubscriptionLedger port - durable store of subscriptions, their order
//! history and notes.
//!
//! Plain storage: no business rules live behind this trait. Writers are
//! expected to hold the subscription's lock (see `SubscriptionLock`).

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, OrderId, SubscriptionId, Timestamp};
use crate::domain::subscription::{OrderRelation, RenewalOrder, Subscription, SubscriptionNote};

/// Keyset cursor and result row of the due query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DueSubscription {
    pub due_at: Timestamp,
    pub id: SubscriptionId,
}

#[async_trait]
pub trait SubscriptionLedger: Send + Sync {
    /// Inserts a new subscription together with its single `new` relation.
    ///
    /// # Errors
    ///
    /// - `DuplicateOrderRelation` if the subscription already has a `new` relation
    async fn insert(
        &self,
        subscription: &Subscription,
        relation: &OrderRelation,
    ) -> Result<(), DomainError>;

    /// Persists a modified subscription.
    ///
    /// The stored version must equal `subscription.version`; it is bumped
    /// by one on success.
    ///
    /// # Errors
    ///
    /// - `SubscriptionNotFound` if the subscription does not exist
    /// - `ConcurrentModification` if the stored version moved on
    async fn update(&self, subscription: &Subscription) -> Result<(), DomainError>;

    async fn find_by_id(&self, id: &SubscriptionId) -> Result<Option<Subscription>, DomainError>;

    /// Subscriptions due for renewal at `now`, ordered by `(due_at, id)`
    /// and starting strictly after the `after` cursor.
    ///
    /// Due means status `active` or `pe_cancelled` without a suspension
    /// reason, and either `next_date <= now`, or no `next_date`, no trial
    /// and `start_date <= now`. `due_at` is `next_date`, else `start_date`.
    async fn find_due(
        &self,
        now: Timestamp,
        after: Option<&DueSubscription>,
        limit: u32,
    ) -> Result<Vec<DueSubscription>, DomainError>;

    /// Hard-deletes the subscription and its notes.
    async fn delete(&self, id: &SubscriptionId) -> Result<(), DomainError>;

    async fn append_relation(&self, relation: &OrderRelation) -> Result<(), DomainError>;

    /// Relations ordered by `created_at`.
    async fn relations_for(&self, id: &SubscriptionId) -> Result<Vec<OrderRelation>, DomainError>;

    /// Removes the relations of an order deleted by the order collaborator.
    async fn detach_order(&self, order_id: &OrderId) -> Result<u64, DomainError>;

    /// Inserts or replaces a renewal order.
    async fn save_order(&self, order: &RenewalOrder) -> Result<(), DomainError>;

    async fn find_order(&self, id: &OrderId) -> Result<Option<RenewalOrder>, DomainError>;

    async fn find_order_by_transaction(
        &self,
        gateway_id: &str,
        transaction_id: &str,
    ) -> Result<Option<RenewalOrder>, DomainError>;

    async fn append_note(&self, note: &SubscriptionNote) -> Result<(), DomainError>;

    /// Notes ordered by `created_at`.
    async fn notes_for(&self, id: &SubscriptionId) -> Result<Vec<SubscriptionNote>, DomainError>;
}
