//! RetryStateRepository port - the single in-flight retry per subscription.

use async_trait::async_trait;

use crate::domain::billing::{RetryState, RetryStatus};
use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp};

/// Storage for retry state.
///
/// Implementations must guarantee at most one `pending` row per
/// subscription (a partial unique index in SQL).
#[async_trait]
pub trait RetryStateRepository: Send + Sync {
    /// Creates or replaces the pending row for `state.subscription_id`.
    async fn upsert_pending(&self, state: &RetryState) -> Result<(), DomainError>;

    async fn find_pending(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<RetryState>, DomainError>;

    /// Pending rows with `next_retry_time <= now`, earliest first.
    async fn find_due(&self, now: Timestamp, limit: u32) -> Result<Vec<RetryState>, DomainError>;

    /// Moves the pending row (if any) to a terminal status.
    ///
    /// Returns false when there was no pending row.
    async fn resolve(
        &self,
        subscription_id: &SubscriptionId,
        status: RetryStatus,
        last_error: Option<&str>,
        now: Timestamp,
    ) -> Result<bool, DomainError>;

    async fn delete_for(&self, subscription_id: &SubscriptionId) -> Result<(), DomainError>;
}
