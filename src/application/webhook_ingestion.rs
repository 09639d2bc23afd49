//! WebhookIngestor - turns gateway callbacks into lifecycle changes.
//!
//! Pipeline per delivery: verify signature, parse, claim `(gateway_id,
//! event_id)`, correlate to an order and subscription, dispatch, then mark
//! the record processed. A failed dispatch releases the claim and returns
//! a 5xx so the gateway redelivers.

use chrono::Duration;
use http::HeaderMap;
use std::sync::Arc;

use crate::domain::billing::ChargeFailure;
use crate::domain::foundation::Timestamp;
use crate::domain::subscription::{
    ActivityType, OrderStatus, RenewalOrder, Subscription, SubscriptionStatus,
};
use crate::domain::webhook::{
    ClaimResult, NormalizedEvent, WebhookError, WebhookEvent, WebhookEventType, WebhookOutcome,
};
use crate::ports::{GatewayRegistry, SubscriptionLedger, WebhookEventRepository};

use super::{BillingError, RetryEngine, SubscriptionLifecycle};

pub struct WebhookIngestor {
    gateways: GatewayRegistry,
    events: Arc<dyn WebhookEventRepository>,
    ledger: Arc<dyn SubscriptionLedger>,
    lifecycle: Arc<SubscriptionLifecycle>,
    engine: Arc<RetryEngine>,
    /// How long a claim blocks other deliveries of the same event.
    lease: Duration,
}

impl WebhookIngestor {
    pub fn new(
        gateways: GatewayRegistry,
        events: Arc<dyn WebhookEventRepository>,
        ledger: Arc<dyn SubscriptionLedger>,
        lifecycle: Arc<SubscriptionLifecycle>,
        engine: Arc<RetryEngine>,
        lease: Duration,
    ) -> Self {
        Self {
            gateways,
            events,
            ledger,
            lifecycle,
            engine,
            lease,
        }
    }

    pub async fn ingest(
        &self,
        gateway_id: &str,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> Result<WebhookOutcome, WebhookError> {
        self.ingest_at(gateway_id, payload, headers, Timestamp::now())
            .await
    }

    pub async fn ingest_at(
        &self,
        gateway_id: &str,
        payload: &[u8],
        headers: &HeaderMap,
        now: Timestamp,
    ) -> Result<WebhookOutcome, WebhookError> {
        let adapter = self
            .gateways
            .get(gateway_id)
            .ok_or_else(|| WebhookError::UnknownGateway(gateway_id.to_string()))?;

        if let Err(e) = adapter.verify_webhook(payload, headers) {
            tracing::warn!(gateway_id, error = %e, "Webhook signature rejected");
            return Err(e);
        }
        let event = adapter.parse_webhook(payload)?;

        let body = serde_json::from_slice(payload).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(payload).into_owned())
        });
        let record = WebhookEvent::received(gateway_id, &event, body, now);

        match self.events.claim(&record, self.lease, now).await? {
            ClaimResult::Claimed => {}
            ClaimResult::AlreadyProcessed | ClaimResult::InFlight => {
                tracing::info!(
                    gateway_id,
                    event_id = %event.event_id,
                    "Duplicate webhook delivery"
                );
                return Ok(WebhookOutcome::Duplicate);
            }
        }

        match self.dispatch(gateway_id, &event, now).await {
            Ok(outcome) => {
                let note = match &outcome {
                    WebhookOutcome::Ignored(reason) => Some(reason.as_str()),
                    _ => None,
                };
                self.events
                    .mark_processed(gateway_id, &event.event_id, note, now)
                    .await?;
                tracing::info!(
                    gateway_id,
                    event_id = %event.event_id,
                    event_type = event.event_type.as_str(),
                    outcome = ?outcome,
                    "Webhook processed"
                );
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(
                    gateway_id,
                    event_id = %event.event_id,
                    error = %e,
                    "Webhook processing failed"
                );
                if let Err(release_err) = self
                    .events
                    .release(gateway_id, &event.event_id, &e.to_string())
                    .await
                {
                    tracing::error!(error = %release_err, "Failed to release webhook claim");
                }
                Err(e)
            }
        }
    }

    async fn dispatch(
        &self,
        gateway_id: &str,
        event: &NormalizedEvent,
        now: Timestamp,
    ) -> Result<WebhookOutcome, WebhookError> {
        if let WebhookEventType::Other(raw) = &event.event_type {
            return Ok(WebhookOutcome::Ignored(format!("unhandled event type {}", raw)));
        }

        let order = self.correlate_order(gateway_id, event).await?;
        let Some(subscription_id) = event
            .subscription_id
            .or_else(|| order.as_ref().map(|o| o.subscription_id))
        else {
            return Ok(WebhookOutcome::Ignored(
                "event does not reference a known subscription or order".to_string(),
            ));
        };

        let _guard = self
            .lifecycle
            .lock(&subscription_id)
            .await
            .map_err(into_webhook_error)?;
        let Some(mut subscription) = self.ledger.find_by_id(&subscription_id).await? else {
            return Ok(WebhookOutcome::Ignored(format!(
                "subscription {} not found",
                subscription_id
            )));
        };

        // Re-read under the lock; the charge path may have settled it.
        let order = match order {
            Some(o) => self.ledger.find_order(&o.id).await?,
            None => None,
        };
        if let Some(o) = &order {
            if o.subscription_id != subscription_id {
                return Ok(WebhookOutcome::Ignored(format!(
                    "order {} belongs to another subscription",
                    o.id
                )));
            }
        }

        let outcome = match &event.event_type {
            WebhookEventType::PaymentSucceeded => {
                let Some(order) = order else {
                    return Ok(WebhookOutcome::Ignored(
                        "payment event without a known renewal order".to_string(),
                    ));
                };
                if order.is_paid() {
                    return Ok(WebhookOutcome::Ignored(format!("order {} already paid", order.id)));
                }
                self.engine
                    .settle_success(&mut subscription, order, event.transaction_id.clone(), now)
                    .await
                    .map_err(into_webhook_error)?;
                WebhookOutcome::Processed
            }
            WebhookEventType::PaymentFailed => {
                let Some(mut order) = order else {
                    return Ok(WebhookOutcome::Ignored(
                        "payment event without a known renewal order".to_string(),
                    ));
                };
                if order.status != OrderStatus::Pending {
                    return Ok(WebhookOutcome::Ignored(format!(
                        "order {} is {}, not awaiting payment",
                        order.id,
                        order.status.as_str()
                    )));
                }
                if event.transaction_id.is_some() {
                    order.transaction_id = event.transaction_id.clone();
                }
                let failure = ChargeFailure::from_gateway(
                    event.error_code.as_deref(),
                    event.error_message.as_deref(),
                );
                let attempt = order.attempt_number.max(1);
                self.engine
                    .settle_failure(&mut subscription, order, failure, attempt, now)
                    .await
                    .map_err(into_webhook_error)?;
                WebhookOutcome::Processed
            }
            WebhookEventType::SubscriptionCancelled => {
                self.apply_status(
                    &mut subscription,
                    SubscriptionStatus::Cancelled,
                    gateway_id,
                    event,
                    now,
                )
                .await?
            }
            WebhookEventType::SubscriptionSuspended => {
                self.apply_status(
                    &mut subscription,
                    SubscriptionStatus::OnHold,
                    gateway_id,
                    event,
                    now,
                )
                .await?
            }
            WebhookEventType::Other(raw) => {
                WebhookOutcome::Ignored(format!("unhandled event type {}", raw))
            }
        };

        self.lifecycle
            .note(
                &subscription_id,
                ActivityType::Webhook,
                format!(
                    "Processed {} event {} from {}",
                    event.raw_type, event.event_id, gateway_id
                ),
                now,
            )
            .await;
        Ok(outcome)
    }

    /// Order named in the payload metadata, else the one carrying the
    /// gateway's transaction id.
    async fn correlate_order(
        &self,
        gateway_id: &str,
        event: &NormalizedEvent,
    ) -> Result<Option<RenewalOrder>, WebhookError> {
        if let Some(order_id) = &event.order_id {
            if let Some(order) = self.ledger.find_order(order_id).await? {
                return Ok(Some(order));
            }
        }
        match &event.transaction_id {
            Some(txn) => Ok(self.ledger.find_order_by_transaction(gateway_id, txn).await?),
            None => Ok(None),
        }
    }

    async fn apply_status(
        &self,
        subscription: &mut Subscription,
        target: SubscriptionStatus,
        gateway_id: &str,
        event: &NormalizedEvent,
        now: Timestamp,
    ) -> Result<WebhookOutcome, WebhookError> {
        if subscription.status == target {
            return Ok(WebhookOutcome::Ignored(format!("subscription already {}", target)));
        }
        let reason = format!("{} event {}", gateway_id, event.raw_type);
        match self.lifecycle.transition(subscription, target, &reason, now).await {
            Ok(_) => Ok(WebhookOutcome::Processed),
            Err(e @ BillingError::InvalidTransition { .. }) => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    event_id = %event.event_id,
                    error = %e,
                    "Webhook requested an invalid transition"
                );
                Ok(WebhookOutcome::Ignored(e.to_string()))
            }
            Err(e) => Err(into_webhook_error(e)),
        }
    }
}

fn into_webhook_error(err: BillingError) -> WebhookError {
    match err {
        BillingError::Infrastructure(msg) => WebhookError::Database(msg),
        other => WebhookError::Processing(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_harness::Harness;
    use crate::domain::subscription::test_support::at;
    use crate::domain::subscription::NotificationKind;
    use crate::ports::RetryStateRepository;
    use serde_json::json;

    async fn pending_order(h: &Harness, sub: &Subscription, txn: Option<&str>) -> RenewalOrder {
        let mut order = RenewalOrder::new(sub.id, sub.price.clone(), at("2024-01-01T00:00:00Z"));
        order.begin_attempt(1, "mock");
        order.transaction_id = txn.map(str::to_string);
        h.memory.ledger.save_order(&order).await.unwrap();
        h.memory.ledger.append_relation(&order.relation()).await.unwrap();
        order
    }

    async fn deliver(h: &Harness, body: serde_json::Value) -> Result<WebhookOutcome, WebhookError> {
        let payload = body.to_string();
        let headers = h.signed_headers(payload.as_bytes());
        h.services
            .webhooks
            .ingest_at("mock", payload.as_bytes(), &headers, at("2024-01-01T01:00:00Z"))
            .await
    }

    // ══════════════════════════════════════════════════════════════
    // Authentication and parsing
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn bad_signature_is_rejected_and_not_stored() {
        let h = Harness::new();
        let payload = json!({"id": "evt_1", "type": "payment.succeeded"}).to_string();
        let mut headers = HeaderMap::new();
        headers.insert(
            crate::adapters::gateway::MOCK_SIGNATURE_HEADER,
            "t=1,v1=deadbeef".parse().unwrap(),
        );

        let err = h
            .services
            .webhooks
            .ingest("mock", payload.as_bytes(), &headers)
            .await
            .unwrap_err();

        assert!(err.is_rejection());
        assert_eq!(h.memory.webhook_events.count().await, 0);
    }

    #[tokio::test]
    async fn unknown_gateway_is_reported() {
        let h = Harness::new();
        let err = h
            .services
            .webhooks
            .ingest("paypal", b"{}", &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::UnknownGateway(_)));
    }

    #[tokio::test]
    async fn malformed_payload_is_a_parse_error() {
        let h = Harness::new();
        let payload = b"not json";
        let headers = h.signed_headers(payload);
        let err = h
            .services
            .webhooks
            .ingest("mock", payload, &headers)
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::ParseError(_)));
    }

    // ══════════════════════════════════════════════════════════════
    // Idempotency
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn duplicate_delivery_mutates_once() {
        let h = Harness::new();
        let sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        let order = pending_order(&h, &sub, None).await;
        let body = json!({
            "id": "evt_dup",
            "type": "payment.succeeded",
            "order_id": order.id.to_string(),
            "transaction_id": "txn_1",
        });

        let first = deliver(&h, body.clone()).await.unwrap();
        let second = deliver(&h, body).await.unwrap();

        assert_eq!(first, WebhookOutcome::Processed);
        assert_eq!(second, WebhookOutcome::Duplicate);
        assert_eq!(h.subscription(&sub.id).await.payments_made, 1);
        assert_eq!(h.bus.count_of_kind(NotificationKind::PaymentSuccess), 1);
        assert_eq!(h.memory.webhook_events.count().await, 1);
        let stored = h
            .memory
            .webhook_events
            .find("mock", "evt_dup")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.processed);
    }

    #[tokio::test]
    async fn concurrent_duplicates_are_processed_once() {
        let h = Harness::new();
        let sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        let order = pending_order(&h, &sub, None).await;
        let body = json!({
            "id": "evt_race",
            "type": "payment.succeeded",
            "order_id": order.id.to_string(),
        });

        let (a, b) = tokio::join!(deliver(&h, body.clone()), deliver(&h, body));

        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(
            outcomes.iter().filter(|o| **o == WebhookOutcome::Processed).count(),
            1
        );
        assert_eq!(
            outcomes.iter().filter(|o| **o == WebhookOutcome::Duplicate).count(),
            1
        );
        assert_eq!(h.subscription(&sub.id).await.payments_made, 1);
    }

    // ══════════════════════════════════════════════════════════════
    // Correlation and dispatch
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn success_for_order_paid_synchronously_is_ignored() {
        let h = Harness::new();
        h.active_subscription("2023-12-01T00:00:00Z").await;
        h.services.scheduler.tick(at("2024-01-01T00:00:00Z")).await.unwrap();
        assert_eq!(h.gateway.call_count(), 1);

        let outcome = deliver(
            &h,
            json!({"id": "evt_late", "type": "payment.succeeded", "transaction_id": "mock_txn_1"}),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, WebhookOutcome::Ignored(_)));
        assert_eq!(h.bus.count_of_kind(NotificationKind::PaymentSuccess), 1);
        let stored = h
            .memory
            .webhook_events
            .find("mock", "evt_late")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.processed);
    }

    #[tokio::test]
    async fn success_correlates_by_transaction_id() {
        let h = Harness::new();
        let sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        pending_order(&h, &sub, Some("pi_123")).await;

        let outcome = deliver(
            &h,
            json!({"id": "evt_2", "type": "payment.succeeded", "transaction_id": "pi_123"}),
        )
        .await
        .unwrap();

        assert_eq!(outcome, WebhookOutcome::Processed);
        let stored = h.subscription(&sub.id).await;
        assert_eq!(stored.payments_made, 1);
        assert_eq!(stored.next_date, Some(at("2024-02-01T01:00:00Z")));
    }

    #[tokio::test]
    async fn success_resolves_pending_retry() {
        let h = Harness::new();
        let sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        h.gateway.push_decline("insufficient_funds", "Insufficient funds");
        h.services.scheduler.tick(at("2024-01-01T00:00:00Z")).await.unwrap();
        let order = h.memory.ledger.orders_for(&sub.id).await.remove(0);

        let outcome = deliver(
            &h,
            json!({"id": "evt_3", "type": "payment.succeeded", "order_id": order.id.to_string()}),
        )
        .await
        .unwrap();

        assert_eq!(outcome, WebhookOutcome::Processed);
        assert!(h.memory.retries.find_pending(&sub.id).await.unwrap().is_none());
        assert_eq!(h.subscription(&sub.id).await.payments_made, 1);
    }

    #[tokio::test]
    async fn failure_for_pending_order_schedules_retry() {
        let h = Harness::new();
        let sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        let order = pending_order(&h, &sub, None).await;

        let outcome = deliver(
            &h,
            json!({
                "id": "evt_4",
                "type": "payment.failed",
                "order_id": order.id.to_string(),
                "error_code": "insufficient_funds",
                "error_message": "Insufficient funds",
            }),
        )
        .await
        .unwrap();

        assert_eq!(outcome, WebhookOutcome::Processed);
        let pending = h.memory.retries.find_pending(&sub.id).await.unwrap().unwrap();
        assert_eq!(pending.attempt_number, 1);
        assert_eq!(pending.order_id, order.id);
    }

    #[tokio::test]
    async fn hard_failure_suspends() {
        let h = Harness::new();
        let sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        let order = pending_order(&h, &sub, None).await;

        deliver(
            &h,
            json!({
                "id": "evt_5",
                "type": "payment.failed",
                "order_id": order.id.to_string(),
                "error_code": "expired_card",
            }),
        )
        .await
        .unwrap();

        let stored = h.subscription(&sub.id).await;
        assert_eq!(stored.status, SubscriptionStatus::PendingCancel);
        assert_eq!(stored.suspended_reason.as_deref(), Some("payment_failed:card_expired"));
    }

    #[tokio::test]
    async fn gateway_cancellation_and_suspension_drive_transitions() {
        let h = Harness::new();
        let sub = h.active_subscription("2023-12-01T00:00:00Z").await;

        let held = deliver(
            &h,
            json!({
                "id": "evt_6",
                "type": "subscription.suspended",
                "subscription_id": sub.id.to_string()
            }),
        )
        .await
        .unwrap();
        assert_eq!(held, WebhookOutcome::Processed);
        assert_eq!(h.subscription(&sub.id).await.status, SubscriptionStatus::OnHold);

        let cancelled = deliver(
            &h,
            json!({
                "id": "evt_7",
                "type": "subscription.cancelled",
                "subscription_id": sub.id.to_string()
            }),
        )
        .await
        .unwrap();
        assert_eq!(cancelled, WebhookOutcome::Processed);
        assert_eq!(h.subscription(&sub.id).await.status, SubscriptionStatus::Cancelled);
        assert!(h.bus.has(NotificationKind::Cancelled));
    }

    #[tokio::test]
    async fn invalid_transition_is_acknowledged_and_ignored() {
        let h = Harness::new();
        let sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        h.services
            .lifecycle
            .apply_transition(&sub.id, SubscriptionStatus::Expired, "term over")
            .await
            .unwrap();

        let outcome = deliver(
            &h,
            json!({
                "id": "evt_8",
                "type": "subscription.suspended",
                "subscription_id": sub.id.to_string()
            }),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, WebhookOutcome::Ignored(_)));
        assert_eq!(h.subscription(&sub.id).await.status, SubscriptionStatus::Expired);
    }

    #[tokio::test]
    async fn uncorrelated_event_is_recorded_with_note() {
        let h = Harness::new();

        let outcome = deliver(
            &h,
            json!({"id": "evt_9", "type": "payment.succeeded", "transaction_id": "unknown"}),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, WebhookOutcome::Ignored(_)));
        let stored = h
            .memory
            .webhook_events
            .find("mock", "evt_9")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.processed);
        assert!(stored.last_error.is_some());
    }

    #[tokio::test]
    async fn unhandled_type_is_acknowledged() {
        let h = Harness::new();
        let outcome = deliver(&h, json!({"id": "evt_10", "type": "charge.refunded"}))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Ignored("unhandled event type charge.refunded".to_string())
        );
    }
}
