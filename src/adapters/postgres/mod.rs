//! PostgreSQL adapters - durable implementations of the storage ports.
//!
//! - `PostgresSubscriptionLedger` - subscriptions, order relations, orders, notes
//! - `PostgresPaymentMethodStore` - vaulted payment methods
//! - `PostgresRetryStateRepository` - retry state with history
//! - `PostgresWebhookEventRepository` - webhook idempotency
//! - `PostgresDelayedTaskQueue` - grace-period callbacks
//! - `PostgresAdvisoryLock` - subscription locks shared across instances
//!
//! Schema lives in `migrations/`.

mod advisory_lock;
mod common;
mod delayed_tasks;
mod ledger;
mod payment_methods;
mod retry_states;
mod webhook_events;

pub use advisory_lock::PostgresAdvisoryLock;
pub use delayed_tasks::PostgresDelayedTaskQueue;
pub use ledger::PostgresSubscriptionLedger;
pub use payment_methods::PostgresPaymentMethodStore;
pub use retry_states::PostgresRetryStateRepository;
pub use webhook_events::PostgresWebhookEventRepository;

use sqlx::PgPool;
use std::sync::Arc;

use crate::adapters::events::NotificationBus;
use crate::application::BillingPorts;
use crate::ports::TokenCipher;

/// Every storage port on `pool`. Notifications stay in-process on `bus`.
pub fn postgres_ports(
    pool: PgPool,
    cipher: Arc<dyn TokenCipher>,
    bus: Arc<NotificationBus>,
) -> BillingPorts {
    BillingPorts {
        ledger: Arc::new(PostgresSubscriptionLedger::new(pool.clone())),
        payment_methods: Arc::new(PostgresPaymentMethodStore::new(pool.clone())),
        retries: Arc::new(PostgresRetryStateRepository::new(pool.clone())),
        webhook_events: Arc::new(PostgresWebhookEventRepository::new(pool.clone())),
        tasks: Arc::new(PostgresDelayedTaskQueue::new(pool.clone())),
        locks: Arc::new(PostgresAdvisoryLock::new(pool)),
        cipher,
        publisher: bus.clone(),
        subscriber: bus,
    }
}
