//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the application services and the outside world. Adapters implement them.
//!
//! ## Storage Ports
//!
//! - `SubscriptionLedger` - subscriptions, order relations, renewal orders, notes
//! - `PaymentMethodStore` - vaulted payment methods (single default per subscription)
//! - `RetryStateRepository` - single in-flight retry per subscription
//! - `WebhookEventRepository` - webhook idempotency and audit
//! - `DelayedTaskQueue` - grace-period callbacks
//!
//! ## Coordination Ports
//!
//! - `SubscriptionLock` - per-subscription mutual exclusion
//! - `NotificationPublisher` / `NotificationSubscriber` - typed lifecycle notifications
//!
//! ## External Ports
//!
//! - `GatewayAdapter` - payment provider strategy
//! - `TokenCipher` - encryption of tokens at rest

mod delayed_task_queue;
mod gateway_adapter;
mod notification_publisher;
mod payment_method_store;
mod retry_state_repository;
mod subscription_ledger;
mod subscription_lock;
mod token_cipher;
mod webhook_event_repository;

pub use delayed_task_queue::{DelayedTask, DelayedTaskQueue, TaskKind};
pub use gateway_adapter::{
    ChargeOutcome, ChargeRequest, ChargeStatus, GatewayAdapter, GatewayError, GatewayErrorCode,
    GatewayRegistry,
};
pub use notification_publisher::{
    NotificationHandler, NotificationPublisher, NotificationSubscriber,
};
pub use payment_method_store::PaymentMethodStore;
pub use retry_state_repository::RetryStateRepository;
pub use subscription_ledger::{DueSubscription, SubscriptionLedger};
pub use subscription_lock::{SubscriptionLock, SubscriptionLockGuard};
pub use token_cipher::TokenCipher;
pub use webhook_event_repository::WebhookEventRepository;
