//! Service wiring.
//!
//! `BillingServices::new` builds every application service from one set of
//! ports and registers the built-in notification handlers. `main` and the
//! tests go through it so both run the same graph.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;

use crate::domain::billing::GracePolicy;
use crate::domain::subscription::NotificationKind;
use crate::ports::{
    DelayedTaskQueue, GatewayRegistry, NotificationPublisher, NotificationSubscriber,
    PaymentMethodStore, RetryStateRepository, SubscriptionLedger, SubscriptionLock, TokenCipher,
    WebhookEventRepository,
};

use super::handlers::subscription::SubscriptionHandlers;
use super::{
    DelayedTaskRunner, GracePeriodManager, LoggingNotificationHandler, PaymentVault,
    RenewalScheduler, RetryCleanupHandler, RetryEngine, RetrySettings, SchedulerSettings,
    SubscriptionLifecycle, TaskRunnerSettings, WebhookIngestor,
};

#[derive(Debug, Clone)]
pub struct BillingSettings {
    pub scheduler: SchedulerSettings,
    pub retry: RetrySettings,
    pub tasks: TaskRunnerSettings,
    /// 0 disables the grace window.
    pub grace_days: u32,
    pub webhook_claim_lease: ChronoDuration,
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSettings::default(),
            retry: RetrySettings::default(),
            tasks: TaskRunnerSettings::default(),
            grace_days: 0,
            webhook_claim_lease: ChronoDuration::minutes(5),
        }
    }
}

/// Every port the services need.
#[derive(Clone)]
pub struct BillingPorts {
    pub ledger: Arc<dyn SubscriptionLedger>,
    pub payment_methods: Arc<dyn PaymentMethodStore>,
    pub retries: Arc<dyn RetryStateRepository>,
    pub webhook_events: Arc<dyn WebhookEventRepository>,
    pub tasks: Arc<dyn DelayedTaskQueue>,
    pub locks: Arc<dyn SubscriptionLock>,
    pub cipher: Arc<dyn TokenCipher>,
    pub publisher: Arc<dyn NotificationPublisher>,
    pub subscriber: Arc<dyn NotificationSubscriber>,
}

#[derive(Clone)]
pub struct BillingServices {
    pub lifecycle: Arc<SubscriptionLifecycle>,
    pub subscriptions: SubscriptionHandlers,
    pub vault: Arc<PaymentVault>,
    pub grace: Arc<GracePeriodManager>,
    pub retry: Arc<RetryEngine>,
    pub scheduler: Arc<RenewalScheduler>,
    pub webhooks: Arc<WebhookIngestor>,
    pub tasks: Arc<DelayedTaskRunner>,
}

impl BillingServices {
    pub fn new(ports: BillingPorts, gateways: GatewayRegistry, settings: BillingSettings) -> Self {
        ports.subscriber.subscribe_all(
            &RetryCleanupHandler::KINDS,
            Arc::new(RetryCleanupHandler::new(
                ports.retries.clone(),
                ports.tasks.clone(),
            )),
        );
        ports
            .subscriber
            .subscribe_all(&NotificationKind::ALL, Arc::new(LoggingNotificationHandler));

        let lifecycle = Arc::new(SubscriptionLifecycle::new(
            ports.ledger.clone(),
            ports.locks.clone(),
            ports.publisher.clone(),
        ));
        let vault = Arc::new(PaymentVault::new(
            ports.payment_methods.clone(),
            ports.cipher.clone(),
            ports.publisher.clone(),
        ));
        let grace = Arc::new(GracePeriodManager::new(
            lifecycle.clone(),
            ports.ledger.clone(),
            ports.tasks.clone(),
            GracePolicy::new(settings.grace_days),
        ));
        let retry = Arc::new(RetryEngine::new(
            lifecycle.clone(),
            ports.ledger.clone(),
            vault.clone(),
            gateways.clone(),
            ports.retries.clone(),
            grace.clone(),
            settings.retry,
        ));
        let scheduler = Arc::new(RenewalScheduler::new(
            lifecycle.clone(),
            ports.ledger.clone(),
            ports.retries.clone(),
            retry.clone(),
            grace.clone(),
            settings.scheduler,
        ));
        let webhooks = Arc::new(WebhookIngestor::new(
            gateways,
            ports.webhook_events.clone(),
            ports.ledger.clone(),
            lifecycle.clone(),
            retry.clone(),
            settings.webhook_claim_lease,
        ));
        let tasks = Arc::new(DelayedTaskRunner::new(
            ports.tasks.clone(),
            grace.clone(),
            retry.clone(),
            ports.webhook_events.clone(),
            settings.tasks,
        ));
        let subscriptions = SubscriptionHandlers::new(
            lifecycle.clone(),
            ports.ledger,
            vault.clone(),
            ports.retries,
            ports.tasks,
        );

        Self {
            lifecycle,
            subscriptions,
            vault,
            grace,
            retry,
            scheduler,
            webhooks,
            tasks,
        }
    }
}
