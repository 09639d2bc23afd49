//! Subscription handlers.
//!
//! ## Commands
//! - Creating a subscription from its originating order
//! - Manual status changes
//! - Restoring from trash
//! - Detaching a deleted order
//! - Hard deleting an ended subscription
//!
//! ## Queries
//! - Get a subscription with its relations and history

mod change_subscription_status;
mod create_subscription;
mod delete_subscription;
mod detach_order;
mod get_subscription;
mod restore_subscription;

use std::sync::Arc;

use crate::ports::{DelayedTaskQueue, RetryStateRepository, SubscriptionLedger};

use crate::application::{PaymentVault, SubscriptionLifecycle};

// Commands
pub use change_subscription_status::{
    ChangeSubscriptionStatusCommand, ChangeSubscriptionStatusHandler,
    ChangeSubscriptionStatusResult,
};
pub use create_subscription::{
    CreateSubscriptionCommand, CreateSubscriptionHandler, CreateSubscriptionResult,
};
pub use delete_subscription::{
    DeleteSubscriptionCommand, DeleteSubscriptionHandler, DeleteSubscriptionResult,
};
pub use detach_order::{DetachOrderCommand, DetachOrderHandler, DetachOrderResult};
pub use restore_subscription::{
    RestoreSubscriptionCommand, RestoreSubscriptionHandler, RestoreSubscriptionResult,
};

// Queries
pub use get_subscription::{GetSubscriptionHandler, GetSubscriptionQuery, GetSubscriptionResult};

/// One instance of every subscription handler, built from shared services.
#[derive(Clone)]
pub struct SubscriptionHandlers {
    pub create: Arc<CreateSubscriptionHandler>,
    pub change_status: Arc<ChangeSubscriptionStatusHandler>,
    pub restore: Arc<RestoreSubscriptionHandler>,
    pub detach_order: Arc<DetachOrderHandler>,
    pub delete: Arc<DeleteSubscriptionHandler>,
    pub get: Arc<GetSubscriptionHandler>,
}

impl SubscriptionHandlers {
    pub fn new(
        lifecycle: Arc<SubscriptionLifecycle>,
        ledger: Arc<dyn SubscriptionLedger>,
        vault: Arc<PaymentVault>,
        retries: Arc<dyn RetryStateRepository>,
        tasks: Arc<dyn DelayedTaskQueue>,
    ) -> Self {
        Self {
            create: Arc::new(CreateSubscriptionHandler::new(
                lifecycle.clone(),
                ledger.clone(),
            )),
            change_status: Arc::new(ChangeSubscriptionStatusHandler::new(lifecycle.clone())),
            restore: Arc::new(RestoreSubscriptionHandler::new(lifecycle.clone())),
            detach_order: Arc::new(DetachOrderHandler::new(ledger.clone())),
            delete: Arc::new(DeleteSubscriptionHandler::new(
                lifecycle.clone(),
                ledger.clone(),
                vault,
                retries,
                tasks,
            )),
            get: Arc::new(GetSubscriptionHandler::new(lifecycle, ledger)),
        }
    }
}
