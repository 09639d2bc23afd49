//! Application layer - the services that drive subscriptions through their
//! billing cycle.
//!
//! Operator-facing entry points live in `handlers` as command and query
//! handlers over these services.
//!
//! Every service mutates a subscription only while holding its lock, and
//! persists through `SubscriptionLifecycle::commit` so the status change,
//! its note and its notifications go out together.

mod delayed_tasks;
mod errors;
mod grace_period;
pub mod handlers;
mod lifecycle;
mod notifications;
mod renewal_scheduler;
mod retry_engine;
mod services;
mod vault;
mod webhook_ingestion;

#[cfg(test)]
pub(crate) mod test_harness;

pub use delayed_tasks::{DelayedTaskRunner, TaskRunReport, TaskRunnerSettings};
pub use errors::BillingError;
pub use grace_period::{GracePeriodManager, GraceTaskOutcome};
pub use lifecycle::SubscriptionLifecycle;
pub use notifications::{LoggingNotificationHandler, RetryCleanupHandler};
pub use renewal_scheduler::{RenewalScheduler, SchedulerSettings, TickReport};
pub use retry_engine::{AttemptOutcome, RetryEngine, RetryRunReport, RetrySettings, RETRY_EXHAUSTED};
pub use services::{BillingPorts, BillingServices, BillingSettings};
pub use vault::PaymentVault;
pub use webhook_ingestion::WebhookIngestor;
