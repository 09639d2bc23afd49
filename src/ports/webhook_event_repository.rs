//! WebhookEventRepository port - idempotency store for inbound gateway events.
//!
//! Gateways redeliver on timeouts and 5xx responses, and sometimes deliver
//! the same event concurrently. The `(gateway_id, event_id)` uniqueness
//! constraint is enforced by storage, never only in application code.

use async_trait::async_trait;
use chrono::Duration;

use crate::domain::foundation::{DomainError, Timestamp};
use crate::domain::webhook::{ClaimResult, WebhookEvent};

#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Records the event and takes ownership of processing it.
    ///
    /// - New event: stored with `claimed_at = now`, returns `Claimed`.
    /// - Already processed: `AlreadyProcessed`.
    /// - Unprocessed, claimed less than `lease` ago: `InFlight`.
    /// - Unprocessed, claim released or older than `lease`: re-claimed,
    ///   returns `Claimed`.
    async fn claim(
        &self,
        event: &WebhookEvent,
        lease: Duration,
        now: Timestamp,
    ) -> Result<ClaimResult, DomainError>;

    /// Marks a claimed event processed. `note` records why an event was
    /// acknowledged without a state change.
    async fn mark_processed(
        &self,
        gateway_id: &str,
        event_id: &str,
        note: Option<&str>,
        now: Timestamp,
    ) -> Result<(), DomainError>;

    /// Releases the claim after a failure so a redelivery can retry.
    async fn release(
        &self,
        gateway_id: &str,
        event_id: &str,
        error: &str,
    ) -> Result<(), DomainError>;

    async fn find(
        &self,
        gateway_id: &str,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>, DomainError>;

    /// Deletes processed events received before `cutoff`.
    async fn purge_processed_before(&self, cutoff: Timestamp) -> Result<u64, DomainError>;
}
