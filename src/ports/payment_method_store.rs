//! PaymentMethodStore port - persistence for vaulted payment methods.
//!
//! One row per `(subscription_id, gateway_id)`. At most one row per
//! subscription has `is_default = true`; implementations enforce this at
//! the storage layer and clear the previous default in the same
//! transaction as setting a new one.

use async_trait::async_trait;

use crate::domain::billing::PaymentMethod;
use crate::domain::foundation::{DomainError, SubscriptionId};

#[async_trait]
pub trait PaymentMethodStore: Send + Sync {
    /// Inserts or replaces the method for its `(subscription_id, gateway_id)`.
    async fn save(&self, method: &PaymentMethod) -> Result<(), DomainError>;

    async fn find(
        &self,
        subscription_id: &SubscriptionId,
        gateway_id: &str,
    ) -> Result<Option<PaymentMethod>, DomainError>;

    async fn find_default(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<PaymentMethod>, DomainError>;

    async fn list(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<PaymentMethod>, DomainError>;

    /// Returns false when nothing was stored for the pair.
    async fn delete(
        &self,
        subscription_id: &SubscriptionId,
        gateway_id: &str,
    ) -> Result<bool, DomainError>;

    async fn delete_all(&self, subscription_id: &SubscriptionId) -> Result<u64, DomainError>;
}
