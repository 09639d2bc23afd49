//! DeleteSubscriptionHandler - hard deletes an ended subscription and
//! everything billed against it.

use std::sync::Arc;

use crate::application::{BillingError, PaymentVault, SubscriptionLifecycle};
use crate::domain::foundation::SubscriptionId;
use crate::ports::{DelayedTaskQueue, RetryStateRepository, SubscriptionLedger};

#[derive(Debug, Clone)]
pub struct DeleteSubscriptionCommand {
    pub subscription_id: SubscriptionId,
}

#[derive(Debug, Clone)]
pub struct DeleteSubscriptionResult {
    pub payment_methods_purged: u64,
}

/// Refuses live subscriptions and subscriptions that still have order
/// relations; detach the orders first.
pub struct DeleteSubscriptionHandler {
    lifecycle: Arc<SubscriptionLifecycle>,
    ledger: Arc<dyn SubscriptionLedger>,
    vault: Arc<PaymentVault>,
    retries: Arc<dyn RetryStateRepository>,
    tasks: Arc<dyn DelayedTaskQueue>,
}

impl DeleteSubscriptionHandler {
    pub fn new(
        lifecycle: Arc<SubscriptionLifecycle>,
        ledger: Arc<dyn SubscriptionLedger>,
        vault: Arc<PaymentVault>,
        retries: Arc<dyn RetryStateRepository>,
        tasks: Arc<dyn DelayedTaskQueue>,
    ) -> Self {
        Self {
            lifecycle,
            ledger,
            vault,
            retries,
            tasks,
        }
    }

    pub async fn handle(
        &self,
        cmd: DeleteSubscriptionCommand,
    ) -> Result<DeleteSubscriptionResult, BillingError> {
        let id = cmd.subscription_id;
        let _guard = self.lifecycle.lock(&id).await?;
        let subscription = self.lifecycle.load(&id).await?;

        // 1. Only ended subscriptions without relations may go
        if !subscription.status.allows_hard_delete() {
            return Err(BillingError::delete_not_allowed(
                id,
                format!("status is {}", subscription.status),
            ));
        }
        let relations = self.ledger.relations_for(&id).await?;
        if !relations.is_empty() {
            return Err(BillingError::delete_not_allowed(
                id,
                format!("{} order relation(s) remain", relations.len()),
            ));
        }

        // 2. Purge dependents before the record itself
        let payment_methods_purged = self.vault.purge(&id).await?;
        self.retries.delete_for(&id).await?;
        self.tasks.cancel_all(&id).await?;
        self.ledger.delete(&id).await?;

        tracing::info!(
            subscription_id = %id,
            payment_methods = payment_methods_purged,
            "Subscription hard deleted"
        );
        Ok(DeleteSubscriptionResult {
            payment_methods_purged,
        })
    }
}
