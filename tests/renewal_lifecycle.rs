//! End-to-end renewal flows driven the way the service runs them: the
//! scheduler tick charges due subscriptions and the delayed task runner
//! fires retries and grace deadlines.

mod common;

use chrono::Duration;
use http::HeaderMap;

use common::{at, TestApp};
use subscription_renewals::adapters::gateway::MOCK_SIGNATURE_HEADER;
use subscription_renewals::application::{BillingSettings, RETRY_EXHAUSTED};
use subscription_renewals::domain::billing::RetryStatus;
use subscription_renewals::domain::foundation::Timestamp;
use subscription_renewals::domain::subscription::{
    NotificationKind, OrderStatus, SubscriptionStatus,
};
use subscription_renewals::domain::webhook::WebhookOutcome;
use subscription_renewals::ports::{DelayedTaskQueue, RetryStateRepository, TaskKind};

const DUE: &str = "2024-01-01T00:00:00Z";

#[tokio::test]
async fn due_renewal_succeeds_on_first_attempt() {
    let app = TestApp::new();
    let sub = app.subscribe("2023-12-01T00:00:00Z", None).await;

    let report = app.services.scheduler.tick(at(DUE)).await.unwrap();

    assert_eq!(report.renewed, 1);
    let stored = app.reload(&sub.id).await;
    assert_eq!(stored.status, SubscriptionStatus::Active);
    assert_eq!(stored.payments_made, 1);
    assert_eq!(stored.next_date, Some(at("2024-02-01T00:00:00Z")));
    assert_eq!(app.bus.count_of_kind(NotificationKind::PaymentSuccess), 1);
}

#[tokio::test]
async fn declines_back_off_then_suspend_after_three_attempts() {
    let app = TestApp::new();
    let sub = app.subscribe("2023-12-01T00:00:00Z", None).await;
    app.decline(3);

    app.services.scheduler.tick(at(DUE)).await.unwrap();
    let first = app.memory.retries.find_pending(&sub.id).await.unwrap().unwrap();
    assert_eq!(first.attempt_number, 1);
    assert_eq!(first.status, RetryStatus::Pending);
    assert_eq!(first.next_retry_time, at(DUE).plus(Duration::days(1)));

    let day_one = at("2024-01-02T00:00:00Z");
    app.services.tasks.run_once(day_one).await.unwrap();
    let second = app.memory.retries.find_pending(&sub.id).await.unwrap().unwrap();
    assert_eq!(second.attempt_number, 2);
    assert_eq!(second.next_retry_time, day_one.plus(Duration::hours(108)));

    let report = app
        .services
        .tasks
        .run_once(second.next_retry_time)
        .await
        .unwrap();

    assert_eq!(report.retries.suspended, 1);
    let stored = app.reload(&sub.id).await;
    assert_eq!(stored.status, SubscriptionStatus::PendingCancel);
    assert_eq!(stored.suspended_reason.as_deref(), Some(RETRY_EXHAUSTED));
    assert!(app.memory.retries.find_pending(&sub.id).await.unwrap().is_none());

    // Nothing fires afterwards: no fourth attempt, no end-of-term cancel.
    let later = at("2024-03-01T00:00:00Z");
    app.services.tasks.run_once(later).await.unwrap();
    app.services.scheduler.tick(later).await.unwrap();
    assert_eq!(app.gateway.call_count(), 3);
    assert_eq!(app.reload(&sub.id).await.status, SubscriptionStatus::PendingCancel);
}

#[tokio::test]
async fn unpaid_subscription_expires_when_grace_window_closes() {
    let app = TestApp::with_settings(BillingSettings {
        grace_days: 7,
        ..BillingSettings::default()
    });
    let sub = app.subscribe("2023-12-01T00:00:00Z", None).await;
    app.decline(10);

    let tick = app.services.scheduler.tick(at(DUE)).await.unwrap();
    assert_eq!(tick.grace_started, 1);
    app.services.tasks.run_once(at("2024-01-02T00:00:00Z")).await.unwrap();

    // Third and last attempt fails on day five; grace still holds.
    let third = app.services.tasks.run_once(at("2024-01-06T12:00:00Z")).await.unwrap();
    assert_eq!(third.retries.suspended, 1);
    let held = app.reload(&sub.id).await;
    assert_eq!(held.status, SubscriptionStatus::Active);
    assert_eq!(held.suspended_reason.as_deref(), Some(RETRY_EXHAUSTED));

    app.services.tasks.run_once(at("2024-01-07T23:59:59Z")).await.unwrap();
    app.services.scheduler.tick(at("2024-01-07T23:59:59Z")).await.unwrap();
    assert_eq!(app.reload(&sub.id).await.status, SubscriptionStatus::Active);
    assert_eq!(app.gateway.call_count(), 3);

    let report = app.services.tasks.run_once(at("2024-01-08T00:00:00Z")).await.unwrap();

    assert_eq!(report.grace_expired, 1);
    let stored = app.reload(&sub.id).await;
    assert_eq!(stored.status, SubscriptionStatus::Expired);
    assert!(app.bus.has(NotificationKind::GracePeriodEnded));
    assert!(app.memory.retries.find_pending(&sub.id).await.unwrap().is_none());
}

#[tokio::test]
async fn payment_inside_grace_window_cancels_expiry() {
    let app = TestApp::with_settings(BillingSettings {
        grace_days: 7,
        ..BillingSettings::default()
    });
    let sub = app.subscribe("2023-12-01T00:00:00Z", None).await;
    app.decline(2);

    app.services.scheduler.tick(at(DUE)).await.unwrap();
    app.services.tasks.run_once(at("2024-01-02T00:00:00Z")).await.unwrap();
    let order = app.memory.ledger.orders_for(&sub.id).await.remove(0);
    assert_eq!(order.status, OrderStatus::Failed);

    // The customer pays out of band on day five; the gateway reports it.
    let payload = serde_json::json!({
        "id": "evt_paid_day_five",
        "type": "payment.succeeded",
        "subscription_id": sub.id.to_string(),
        "order_id": order.id.to_string(),
        "transaction_id": "txn_manual",
    })
    .to_string();
    let mut headers = HeaderMap::new();
    let signature = app
        .gateway
        .sign(payload.as_bytes(), Timestamp::now().as_unix_secs())
        .unwrap();
    headers.insert(MOCK_SIGNATURE_HEADER, signature.parse().unwrap());
    let outcome = app
        .services
        .webhooks
        .ingest_at("mock", payload.as_bytes(), &headers, at("2024-01-05T00:00:00Z"))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);

    assert!(app
        .memory
        .tasks
        .find(&sub.id, TaskKind::GracePeriodEnd)
        .await
        .unwrap()
        .is_none());
    let report = app.services.tasks.run_once(at("2024-01-08T00:00:00Z")).await.unwrap();

    assert_eq!(report.grace_expired, 0);
    let stored = app.reload(&sub.id).await;
    assert_eq!(stored.status, SubscriptionStatus::Active);
    assert_eq!(stored.payments_made, 1);
    assert_eq!(stored.grace_period_end, None);
    assert_eq!(app.gateway.call_count(), 2);
}
