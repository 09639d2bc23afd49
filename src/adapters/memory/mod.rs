//! In-memory adapters for every storage and coordination port.
//!
//! Used by the test suite and by database-less local runs.

mod delayed_tasks;
mod ledger;
mod locks;
mod payment_methods;
mod retry_states;
mod webhook_events;

pub use delayed_tasks::InMemoryDelayedTaskQueue;
pub use ledger::InMemorySubscriptionLedger;
pub use locks::InMemorySubscriptionLock;
pub use payment_methods::InMemoryPaymentMethodStore;
pub use retry_states::InMemoryRetryStateRepository;
pub use webhook_events::InMemoryWebhookEventRepository;

use std::sync::Arc;

use crate::adapters::events::NotificationBus;
use crate::application::BillingPorts;
use crate::ports::TokenCipher;

/// One of each in-memory adapter, keeping the concrete types so tests can
/// inspect them.
#[derive(Clone)]
pub struct InMemoryPorts {
    pub ledger: Arc<InMemorySubscriptionLedger>,
    pub payment_methods: Arc<InMemoryPaymentMethodStore>,
    pub retries: Arc<InMemoryRetryStateRepository>,
    pub webhook_events: Arc<InMemoryWebhookEventRepository>,
    pub tasks: Arc<InMemoryDelayedTaskQueue>,
    pub locks: Arc<InMemorySubscriptionLock>,
    pub bus: Arc<NotificationBus>,
}

impl InMemoryPorts {
    pub fn new() -> Self {
        Self::with_bus(NotificationBus::new())
    }

    /// Same, with a bus that records everything published.
    pub fn recording() -> Self {
        Self::with_bus(NotificationBus::recording())
    }

    fn with_bus(bus: NotificationBus) -> Self {
        Self {
            ledger: Arc::new(InMemorySubscriptionLedger::new()),
            payment_methods: Arc::new(InMemoryPaymentMethodStore::new()),
            retries: Arc::new(InMemoryRetryStateRepository::new()),
            webhook_events: Arc::new(InMemoryWebhookEventRepository::new()),
            tasks: Arc::new(InMemoryDelayedTaskQueue::new()),
            locks: Arc::new(InMemorySubscriptionLock::new()),
            bus: Arc::new(bus),
        }
    }

    pub fn ports(&self, cipher: Arc<dyn TokenCipher>) -> BillingPorts {
        BillingPorts {
            ledger: self.ledger.clone(),
            payment_methods: self.payment_methods.clone(),
            retries: self.retries.clone(),
            webhook_events: self.webhook_events.clone(),
            tasks: self.tasks.clone(),
            locks: self.locks.clone(),
            cipher,
            publisher: self.bus.clone(),
            subscriber: self.bus.clone(),
        }
    }
}

impl Default for InMemoryPorts {
    fn default() -> Self {
        Self::new()
    }
}
