//! Shared wiring for the integration tests: in-memory storage, a
//! recording notification bus and the mock gateway.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::sync::Arc;

use subscription_renewals::adapters::crypto::AesGcmTokenCipher;
use subscription_renewals::adapters::events::NotificationBus;
use subscription_renewals::adapters::gateway::MockGateway;
use subscription_renewals::adapters::memory::InMemoryPorts;
use subscription_renewals::application::handlers::subscription::CreateSubscriptionCommand;
use subscription_renewals::application::{BillingServices, BillingSettings};
use subscription_renewals::domain::billing::SavePaymentMethod;
use subscription_renewals::domain::foundation::{
    Money, OrderId, OrderItemId, OwnerId, SubscriptionId, Timestamp,
};
use subscription_renewals::domain::subscription::{
    BillingPeriod, NewSubscription, Subscription, SubscriptionStatus,
};
use subscription_renewals::ports::GatewayRegistry;

pub struct TestApp {
    pub services: BillingServices,
    pub memory: InMemoryPorts,
    pub bus: Arc<NotificationBus>,
    pub gateway: Arc<MockGateway>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_settings(BillingSettings::default())
    }

    pub fn with_settings(settings: BillingSettings) -> Self {
        let memory = InMemoryPorts::recording();
        let gateway = Arc::new(MockGateway::default_for_tests());
        let services = BillingServices::new(
            memory.ports(Arc::new(AesGcmTokenCipher::new([42u8; 32]))),
            GatewayRegistry::new().register(gateway.clone()),
            settings,
        );
        Self {
            services,
            bus: memory.bus.clone(),
            memory,
            gateway,
        }
    }

    /// Monthly 19.99 USD subscription with a default card on the mock gateway.
    pub async fn subscribe(&self, start: &str, max_retry_attempts: Option<u32>) -> Subscription {
        let sub = self
            .services
            .subscriptions
            .create
            .handle(CreateSubscriptionCommand {
                params: NewSubscription {
                    owner_id: OwnerId::new(),
                    order_id: OrderId::new(),
                    order_item_id: OrderItemId::new(),
                    price: Money::parse("19.99", "USD").unwrap(),
                    signup_fee: Money::zero("USD").unwrap(),
                    schedule: BillingPeriod::monthly(),
                    trial: None,
                    start_date: at(start),
                    max_payments: 0,
                    auto_renew: true,
                    user_cancel_allowed: true,
                    max_retry_attempts,
                    initial_status: SubscriptionStatus::Active,
                },
            })
            .await
            .unwrap()
            .subscription;

        self.services
            .vault
            .save(SavePaymentMethod {
                subscription_id: sub.id,
                gateway_id: "mock".to_string(),
                token: SecretString::new("tok_visa".to_string()),
                customer_id: None,
                gateway_customer_id: Some("cus_test".to_string()),
                is_default: true,
            })
            .await
            .unwrap();
        sub
    }

    pub async fn reload(&self, id: &SubscriptionId) -> Subscription {
        self.services.lifecycle.load(id).await.unwrap()
    }

    pub fn decline(&self, times: usize) {
        for _ in 0..times {
            self.gateway.push_decline("insufficient_funds", "Insufficient funds");
        }
    }
}

pub fn at(s: &str) -> Timestamp {
    Timestamp::from_datetime(DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc))
}
