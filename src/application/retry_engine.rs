//! RetryEngine - charges renewals and decides what a failure means.
//!
//! One attempt is: pick the default vaulted method, resolve its gateway,
//! charge under a timeout, then settle. Success records the payment and
//! reactivates held subscriptions. Retryable failures schedule the next
//! attempt with backoff; exhausted or hard failures suspend.
//!
//! Every entry point expects the caller to hold the subscription lock.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::billing::{
    ChargeFailure, FailureReason, RetryDecision, RetryPolicy, RetryState, RetryStatus,
};
use crate::domain::foundation::{OrderId, Timestamp};
use crate::domain::subscription::{
    ActivityType, Notification, RenewalOrder, Subscription, SubscriptionStatus,
};
use crate::ports::{
    ChargeRequest, ChargeStatus, GatewayError, GatewayRegistry, RetryStateRepository,
    SubscriptionLedger,
};

use super::{BillingError, GracePeriodManager, PaymentVault, SubscriptionLifecycle};

/// Suspension reason once every allowed attempt has failed.
pub const RETRY_EXHAUSTED: &str = "payment_retry_exhausted";

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub policy: RetryPolicy,
    pub charge_timeout: Duration,
    /// Due retries loaded per run.
    pub batch_size: u32,
    pub concurrency: usize,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            charge_timeout: Duration::from_secs(30),
            batch_size: 100,
            concurrency: 8,
        }
    }
}

/// Result of one renewal attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Paid {
        order_id: OrderId,
        transaction_id: Option<String>,
    },
    RetryScheduled {
        order_id: OrderId,
        attempt_number: u32,
        next_retry_time: Timestamp,
    },
    Suspended {
        order_id: Option<OrderId>,
        reason: String,
    },
    /// The payment limit was reached; nothing was charged.
    Expired,
    /// The order had already been paid; the subscription was brought in line.
    AlreadySettled { order_id: OrderId },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryRunReport {
    pub due: usize,
    pub paid: usize,
    pub rescheduled: usize,
    pub suspended: usize,
    pub expired: usize,
    pub cancelled: usize,
    pub stale: usize,
    pub skipped_locked: usize,
    pub errors: usize,
}

enum RetryStep {
    Attempted(AttemptOutcome),
    Cancelled,
    Stale,
    Busy,
}

pub struct RetryEngine {
    lifecycle: Arc<SubscriptionLifecycle>,
    ledger: Arc<dyn SubscriptionLedger>,
    vault: Arc<PaymentVault>,
    gateways: GatewayRegistry,
    retries: Arc<dyn RetryStateRepository>,
    grace: Arc<GracePeriodManager>,
    settings: RetrySettings,
}

impl RetryEngine {
    pub fn new(
        lifecycle: Arc<SubscriptionLifecycle>,
        ledger: Arc<dyn SubscriptionLedger>,
        vault: Arc<PaymentVault>,
        gateways: GatewayRegistry,
        retries: Arc<dyn RetryStateRepository>,
        grace: Arc<GracePeriodManager>,
        settings: RetrySettings,
    ) -> Self {
        Self {
            lifecycle,
            ledger,
            vault,
            gateways,
            retries,
            grace,
            settings,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.settings.policy
    }

    /// Charges `subscription` for its next renewal.
    ///
    /// `order` is `None` for the first attempt of a cycle; retries pass the
    /// order created by that first attempt so all attempts share it.
    pub async fn attempt_renewal(
        &self,
        subscription: &mut Subscription,
        order: Option<RenewalOrder>,
        attempt_number: u32,
        now: Timestamp,
    ) -> Result<AttemptOutcome, BillingError> {
        if subscription.has_reached_payment_limit() {
            return self.expire_at_limit(subscription, now).await;
        }

        let mut order = match order {
            Some(order) => order,
            None => self.open_order(subscription, now).await?,
        };
        if order.is_paid() {
            return self.reconcile_paid_order(subscription, &order, now).await;
        }

        let method = match self.vault.get_default(&subscription.id).await {
            Ok(Some(method)) => method,
            Ok(None) => {
                let failure = ChargeFailure::new(
                    FailureReason::MissingPaymentMethod,
                    "no default payment method on file",
                );
                return self
                    .fail_configuration(subscription, order, attempt_number, failure, now)
                    .await;
            }
            Err(BillingError::Encryption(msg)) => {
                let failure = ChargeFailure {
                    reason: FailureReason::InvalidPaymentMethod,
                    code: "token_decryption_failed".to_string(),
                    message: msg,
                };
                return self
                    .fail_configuration(subscription, order, attempt_number, failure, now)
                    .await;
            }
            Err(e) => return Err(e),
        };

        let Some(gateway) = self.gateways.get(&method.gateway_id) else {
            let failure = ChargeFailure::new(
                FailureReason::GatewayNotConfigured,
                format!("no adapter registered for gateway '{}'", method.gateway_id),
            );
            return self
                .fail_configuration(subscription, order, attempt_number, failure, now)
                .await;
        };

        order.begin_attempt(attempt_number, gateway.gateway_id());
        self.ledger.save_order(&order).await?;

        let request = ChargeRequest {
            subscription_id: subscription.id,
            order_id: order.id,
            token: method.token.clone(),
            amount: order.amount.clone(),
            idempotency_key: order.idempotency_key(),
            gateway_customer_id: method.gateway_customer_id.clone(),
        };

        tracing::info!(
            subscription_id = %subscription.id,
            order_id = %order.id,
            gateway_id = gateway.gateway_id(),
            attempt = attempt_number,
            amount = %order.amount,
            "Charging renewal"
        );

        let charge = tokio::time::timeout(self.settings.charge_timeout, gateway.charge(request));
        let result = match charge.await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::timeout(format!(
                "charge did not complete within {:?}",
                self.settings.charge_timeout
            ))),
        };

        match result {
            Ok(outcome) if outcome.status == ChargeStatus::Succeeded => {
                self.settle_success(subscription, order, outcome.transaction_id, now)
                    .await
            }
            Ok(outcome) => {
                let failure = ChargeFailure::from_gateway(
                    outcome.error_code.as_deref(),
                    outcome.error_message.as_deref(),
                );
                order.transaction_id = outcome.transaction_id.or(order.transaction_id);
                self.settle_failure(subscription, order, failure, attempt_number, now)
                    .await
            }
            Err(e) => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    order_id = %order.id,
                    error = %e,
                    "Gateway error while charging renewal"
                );
                self.settle_failure(subscription, order, e.to_failure(), attempt_number, now)
                    .await
            }
        }
    }

    /// Records a confirmed payment for `order`.
    pub async fn settle_success(
        &self,
        subscription: &mut Subscription,
        mut order: RenewalOrder,
        transaction_id: Option<String>,
        now: Timestamp,
    ) -> Result<AttemptOutcome, BillingError> {
        order.mark_paid(transaction_id, now);
        self.ledger.save_order(&order).await?;
        self.apply_payment(subscription, &order, now).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            order_id = %order.id,
            "Renewal payment succeeded"
        );
        Ok(AttemptOutcome::Paid {
            order_id: order.id,
            transaction_id: order.transaction_id,
        })
    }

    /// Records a declined or errored attempt and decides what follows.
    pub async fn settle_failure(
        &self,
        subscription: &mut Subscription,
        mut order: RenewalOrder,
        failure: ChargeFailure,
        attempt_number: u32,
        now: Timestamp,
    ) -> Result<AttemptOutcome, BillingError> {
        order.mark_failed(None, failure.to_string());
        self.ledger.save_order(&order).await?;
        self.announce_failure(subscription, &order, &failure, attempt_number, now)
            .await;

        let limit = subscription.retry_limit(self.settings.policy.max_attempts());
        match self
            .settings
            .policy
            .decide(&failure, attempt_number, limit, now)
        {
            RetryDecision::Retry { next_retry_time } => {
                let state = RetryState::pending(
                    subscription.id,
                    order.id,
                    attempt_number,
                    next_retry_time,
                    failure.to_string(),
                    now,
                );
                self.retries.upsert_pending(&state).await?;
                self.lifecycle
                    .note(
                        &subscription.id,
                        ActivityType::RetryScheduled,
                        format!(
                            "Payment retry {} of {} scheduled for {}",
                            attempt_number + 1,
                            limit,
                            next_retry_time
                        ),
                        now,
                    )
                    .await;

                tracing::warn!(
                    subscription_id = %subscription.id,
                    order_id = %order.id,
                    attempt = attempt_number,
                    reason = %failure.reason,
                    next_retry_time = %next_retry_time,
                    "Renewal payment failed, retry scheduled"
                );
                Ok(AttemptOutcome::RetryScheduled {
                    order_id: order.id,
                    attempt_number,
                    next_retry_time,
                })
            }
            RetryDecision::Exhausted => {
                self.suspend(subscription, Some(order.id), RETRY_EXHAUSTED, now)
                    .await
            }
            RetryDecision::NonRetryable => {
                let reason = format!("payment_failed:{}", failure.reason);
                self.suspend(subscription, Some(order.id), &reason, now).await
            }
        }
    }

    /// Suspends renewals: an active subscription moves to pending-cancel
    /// and the reason is recorded. The pending retry, if any, is closed.
    ///
    /// Inside an open grace window the status stays `active`; the window's
    /// `GracePeriodEnd` task expires the subscription when it closes.
    pub async fn suspend(
        &self,
        subscription: &mut Subscription,
        order_id: Option<OrderId>,
        reason: &str,
        now: Timestamp,
    ) -> Result<AttemptOutcome, BillingError> {
        let in_grace = subscription.grace_period_end.is_some_and(|end| now < end);
        let mut notifications = Vec::new();
        if subscription.status == SubscriptionStatus::Active && !in_grace {
            notifications = SubscriptionLifecycle::stage_transition(
                subscription,
                SubscriptionStatus::PendingCancel,
                reason,
                now,
            )?;
        }
        subscription.suspend(reason, now);
        notifications.push(Notification::RetryExhausted {
            subscription_id: subscription.id,
            order_id,
            reason: reason.to_string(),
        });

        self.lifecycle
            .commit(
                subscription,
                Some((
                    ActivityType::Suspension,
                    format!("Renewals suspended: {}", reason),
                )),
                notifications,
                now,
            )
            .await?;
        self.retries
            .resolve(&subscription.id, RetryStatus::Failed, Some(reason), now)
            .await?;

        tracing::warn!(
            subscription_id = %subscription.id,
            reason,
            in_grace,
            "Subscription renewals suspended"
        );
        Ok(AttemptOutcome::Suspended {
            order_id,
            reason: reason.to_string(),
        })
    }

    /// Runs every retry whose time has come.
    pub async fn process_due_retries(
        &self,
        now: Timestamp,
    ) -> Result<RetryRunReport, BillingError> {
        let due = self.retries.find_due(now, self.settings.batch_size).await?;
        let mut report = RetryRunReport {
            due: due.len(),
            ..RetryRunReport::default()
        };

        let results: Vec<_> = stream::iter(due)
            .map(|state| async move {
                let subscription_id = state.subscription_id;
                (subscription_id, self.run_retry(state, now).await)
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        for (subscription_id, result) in results {
            match result {
                Ok(RetryStep::Attempted(outcome)) => match outcome {
                    AttemptOutcome::Paid { .. } | AttemptOutcome::AlreadySettled { .. } => {
                        report.paid += 1
                    }
                    AttemptOutcome::RetryScheduled { .. } => report.rescheduled += 1,
                    AttemptOutcome::Suspended { .. } => report.suspended += 1,
                    AttemptOutcome::Expired => report.expired += 1,
                },
                Ok(RetryStep::Cancelled) => report.cancelled += 1,
                Ok(RetryStep::Stale) => report.stale += 1,
                Ok(RetryStep::Busy) => report.skipped_locked += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(
                        subscription_id = %subscription_id,
                        error = %e,
                        "Payment retry failed"
                    );
                }
            }
        }

        if report.due > 0 {
            tracing::info!(
                due = report.due,
                paid = report.paid,
                rescheduled = report.rescheduled,
                suspended = report.suspended,
                errors = report.errors,
                "Processed due payment retries"
            );
        }
        Ok(report)
    }

    async fn run_retry(
        &self,
        state: RetryState,
        now: Timestamp,
    ) -> Result<RetryStep, BillingError> {
        let id = state.subscription_id;
        let Some(_guard) = self.lifecycle.try_lock(&id).await? else {
            return Ok(RetryStep::Busy);
        };

        // Re-read under the lock; another worker may have settled it.
        let current = self.retries.find_pending(&id).await?;
        let still_due = current.as_ref().is_some_and(|c| {
            c.order_id == state.order_id
                && c.attempt_number == state.attempt_number
                && c.is_due(now)
        });
        if !still_due {
            return Ok(RetryStep::Stale);
        }

        let mut subscription = match self.ledger.find_by_id(&id).await? {
            Some(s) if s.status.is_renewable() => s,
            found => {
                let why = match found {
                    Some(s) => format!("subscription is {}", s.status),
                    None => "subscription no longer exists".to_string(),
                };
                self.retries
                    .resolve(&id, RetryStatus::Failed, Some(&why), now)
                    .await?;
                tracing::info!(subscription_id = %id, reason = %why, "Abandoned payment retry");
                return Ok(RetryStep::Stale);
            }
        };

        // Customer asked to stop at end of term; no more charges.
        if subscription.status == SubscriptionStatus::PendingCancel
            && !subscription.is_suspended()
        {
            self.lifecycle
                .transition(
                    &mut subscription,
                    SubscriptionStatus::Cancelled,
                    "cancelled at end of prepaid term",
                    now,
                )
                .await?;
            self.retries
                .resolve(&id, RetryStatus::Failed, Some("subscription cancelled"), now)
                .await?;
            return Ok(RetryStep::Cancelled);
        }

        let order = self.ledger.find_order(&state.order_id).await?;
        let outcome = self
            .attempt_renewal(&mut subscription, order, state.next_attempt(), now)
            .await?;
        Ok(RetryStep::Attempted(outcome))
    }

    async fn open_order(
        &self,
        subscription: &Subscription,
        now: Timestamp,
    ) -> Result<RenewalOrder, BillingError> {
        let order = RenewalOrder::new(subscription.id, subscription.price.clone(), now);
        self.ledger.save_order(&order).await?;
        self.ledger.append_relation(&order.relation()).await?;
        tracing::debug!(
            subscription_id = %subscription.id,
            order_id = %order.id,
            "Renewal order created"
        );
        Ok(order)
    }

    async fn expire_at_limit(
        &self,
        subscription: &mut Subscription,
        now: Timestamp,
    ) -> Result<AttemptOutcome, BillingError> {
        self.lifecycle
            .transition(
                subscription,
                SubscriptionStatus::Expired,
                "maximum number of payments reached",
                now,
            )
            .await?;
        self.retries
            .resolve(&subscription.id, RetryStatus::Failed, Some("payment limit reached"), now)
            .await?;
        self.grace.clear(&subscription.id).await?;
        Ok(AttemptOutcome::Expired)
    }

    /// The order was paid but the subscription write did not land; apply it
    /// now instead of charging twice.
    async fn reconcile_paid_order(
        &self,
        subscription: &mut Subscription,
        order: &RenewalOrder,
        now: Timestamp,
    ) -> Result<AttemptOutcome, BillingError> {
        tracing::warn!(
            subscription_id = %subscription.id,
            order_id = %order.id,
            "Renewal order already paid, applying payment without charging"
        );
        let paid_at = order.paid_at.unwrap_or(now);
        self.apply_payment(subscription, order, paid_at).await?;
        Ok(AttemptOutcome::AlreadySettled { order_id: order.id })
    }

    async fn apply_payment(
        &self,
        subscription: &mut Subscription,
        order: &RenewalOrder,
        now: Timestamp,
    ) -> Result<(), BillingError> {
        let payment = Notification::PaymentSuccess {
            subscription_id: subscription.id,
            order_id: order.id,
            amount: order.amount.clone(),
            transaction_id: order.transaction_id.clone(),
        };

        let resume = match subscription.status {
            SubscriptionStatus::Active => false,
            SubscriptionStatus::OnHold | SubscriptionStatus::Pending => true,
            SubscriptionStatus::PendingCancel => subscription.is_suspended(),
            other => {
                // Paid after the subscription ended; keep the money on record only.
                tracing::warn!(
                    subscription_id = %subscription.id,
                    order_id = %order.id,
                    status = %other,
                    "Payment received for a subscription that is no longer renewable"
                );
                self.lifecycle
                    .note(
                        &subscription.id,
                        ActivityType::PaymentSuccess,
                        format!(
                            "Payment for order {} received while subscription is {}; \
                             status unchanged",
                            order.id, other
                        ),
                        now,
                    )
                    .await;
                self.lifecycle.publish(vec![payment]).await;
                self.finish_cycle(subscription, now).await?;
                return Ok(());
            }
        };

        let mut notifications = Vec::new();
        if resume {
            notifications = SubscriptionLifecycle::stage_transition(
                subscription,
                SubscriptionStatus::Active,
                "renewal payment received",
                now,
            )?;
        }
        subscription.record_renewal_payment(now)?;
        notifications.push(payment);

        self.lifecycle
            .commit(
                subscription,
                Some((
                    ActivityType::PaymentSuccess,
                    format!(
                        "Renewal payment of {} received for order {}",
                        order.amount, order.id
                    ),
                )),
                notifications,
                now,
            )
            .await?;
        self.finish_cycle(subscription, now).await
    }

    async fn finish_cycle(
        &self,
        subscription: &Subscription,
        now: Timestamp,
    ) -> Result<(), BillingError> {
        self.retries
            .resolve(&subscription.id, RetryStatus::Succeeded, None, now)
            .await?;
        self.grace.clear(&subscription.id).await
    }

    async fn announce_failure(
        &self,
        subscription: &Subscription,
        order: &RenewalOrder,
        failure: &ChargeFailure,
        attempt_number: u32,
        now: Timestamp,
    ) {
        self.lifecycle
            .note(
                &subscription.id,
                ActivityType::PaymentFailure,
                format!(
                    "Renewal payment attempt {} for order {} failed: {}",
                    attempt_number, order.id, failure
                ),
                now,
            )
            .await;
        self.lifecycle
            .publish(vec![Notification::PaymentFailed {
                subscription_id: subscription.id,
                order_id: order.id,
                attempt_number,
                error_code: failure.code.clone(),
                retryable: failure.is_retryable(),
            }])
            .await;
    }

    async fn fail_configuration(
        &self,
        subscription: &mut Subscription,
        mut order: RenewalOrder,
        attempt_number: u32,
        failure: ChargeFailure,
        now: Timestamp,
    ) -> Result<AttemptOutcome, BillingError> {
        tracing::error!(
            subscription_id = %subscription.id,
            order_id = %order.id,
            error = %failure,
            "Renewal cannot be charged, configuration error"
        );
        order.attempt_number = attempt_number;
        order.mark_failed(None, failure.to_string());
        self.ledger.save_order(&order).await?;
        self.announce_failure(subscription, &order, &failure, attempt_number, now)
            .await;

        let reason = format!("configuration_error:{}", failure.code);
        self.suspend(subscription, Some(order.id), &reason, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_harness::Harness;
    use crate::application::BillingSettings;
    use crate::domain::billing::SavePaymentMethod;
    use crate::domain::subscription::test_support::at;
    use crate::domain::subscription::{NotificationKind, OrderStatus};
    use chrono::Duration as ChronoDuration;
    use secrecy::SecretString;

    const DUE: &str = "2024-01-01T00:00:00Z";

    async fn first_attempt(h: &Harness, sub: &mut Subscription) -> AttemptOutcome {
        let _guard = h.services.lifecycle.lock(&sub.id).await.unwrap();
        h.services
            .retry
            .attempt_renewal(sub, None, 1, at(DUE))
            .await
            .unwrap()
    }

    // ══════════════════════════════════════════════════════════════
    // Successful charges
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn success_records_payment_and_advances_next_date() {
        let h = Harness::new();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;

        let outcome = first_attempt(&h, &mut sub).await;

        assert!(matches!(outcome, AttemptOutcome::Paid { .. }));
        let stored = h.subscription(&sub.id).await;
        assert_eq!(stored.payments_made, 1);
        assert_eq!(stored.next_date, Some(at("2024-02-01T00:00:00Z")));
        assert_eq!(h.bus.count_of_kind(NotificationKind::PaymentSuccess), 1);

        let orders = h.memory.ledger.orders_for(&sub.id).await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Paid);
        assert_eq!(h.gateway.calls()[0].token, "tok_visa");
        assert_eq!(
            h.gateway.calls()[0].idempotency_key,
            format!("renewal-{}-1", orders[0].id)
        );
    }

    #[tokio::test]
    async fn success_reactivates_suspended_subscription() {
        let h = Harness::new();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        {
            let _guard = h.services.lifecycle.lock(&sub.id).await.unwrap();
            h.services
                .retry
                .suspend(&mut sub, None, RETRY_EXHAUSTED, at(DUE))
                .await
                .unwrap();
        }
        assert_eq!(h.subscription(&sub.id).await.status, SubscriptionStatus::PendingCancel);

        let outcome = first_attempt(&h, &mut sub).await;

        assert!(matches!(outcome, AttemptOutcome::Paid { .. }));
        let stored = h.subscription(&sub.id).await;
        assert_eq!(stored.status, SubscriptionStatus::Active);
        assert_eq!(stored.suspended_reason, None);
    }

    // ══════════════════════════════════════════════════════════════
    // Backoff and suspension
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn soft_decline_schedules_retry_after_one_day() {
        let h = Harness::new();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        h.gateway.push_decline("insufficient_funds", "Insufficient funds");

        let outcome = first_attempt(&h, &mut sub).await;

        let expected = at(DUE).plus(ChronoDuration::days(1));
        match outcome {
            AttemptOutcome::RetryScheduled {
                attempt_number,
                next_retry_time,
                ..
            } => {
                assert_eq!(attempt_number, 1);
                assert_eq!(next_retry_time, expected);
            }
            other => panic!("unexpected {:?}", other),
        }
        let pending = h.memory.retries.find_pending(&sub.id).await.unwrap().unwrap();
        assert_eq!(pending.next_retry_time, expected);
        assert_eq!(h.subscription(&sub.id).await.status, SubscriptionStatus::Active);
        assert_eq!(h.bus.count_of_kind(NotificationKind::PaymentFailed), 1);
    }

    #[tokio::test]
    async fn second_failure_backs_off_four_and_a_half_days() {
        let h = Harness::new();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        h.gateway.push_decline("card_declined", "Your card was declined");
        h.gateway.push_decline("card_declined", "Your card was declined");
        first_attempt(&h, &mut sub).await;

        let retry_at = at(DUE).plus(ChronoDuration::days(1));
        let report = h.services.retry.process_due_retries(retry_at).await.unwrap();

        assert_eq!(report.due, 1);
        assert_eq!(report.rescheduled, 1);
        let pending = h.memory.retries.find_pending(&sub.id).await.unwrap().unwrap();
        assert_eq!(pending.attempt_number, 2);
        assert_eq!(pending.next_retry_time, retry_at.plus(ChronoDuration::hours(108)));
    }

    #[tokio::test]
    async fn retries_reuse_the_order_with_fresh_idempotency_key() {
        let h = Harness::new();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        h.gateway.push_decline("insufficient_funds", "Insufficient funds");
        first_attempt(&h, &mut sub).await;

        let report = h
            .services
            .retry
            .process_due_retries(at("2024-01-02T00:00:00Z"))
            .await
            .unwrap();

        assert_eq!(report.paid, 1);
        let calls = h.gateway.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].order_id, calls[1].order_id);
        assert_ne!(calls[0].idempotency_key, calls[1].idempotency_key);
        assert_eq!(h.memory.ledger.orders_for(&sub.id).await.len(), 1);
        assert!(h.memory.retries.find_pending(&sub.id).await.unwrap().is_none());
        assert_eq!(h.subscription(&sub.id).await.payments_made, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_suspend_the_subscription() {
        let h = Harness::new();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        for _ in 0..3 {
            h.gateway.push_decline("insufficient_funds", "Insufficient funds");
        }
        first_attempt(&h, &mut sub).await;

        let mut now = at("2024-01-02T00:00:00Z");
        h.services.retry.process_due_retries(now).await.unwrap();
        now = now.plus(ChronoDuration::hours(108));
        let report = h.services.retry.process_due_retries(now).await.unwrap();

        assert_eq!(report.suspended, 1);
        let stored = h.subscription(&sub.id).await;
        assert_eq!(stored.status, SubscriptionStatus::PendingCancel);
        assert_eq!(stored.suspended_reason.as_deref(), Some(RETRY_EXHAUSTED));
        assert!(h.bus.has(NotificationKind::RetryExhausted));
        assert_eq!(h.gateway.call_count(), 3);
        assert!(h.memory.retries.find_pending(&sub.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn suspension_inside_grace_window_keeps_subscription_active() {
        let h = Harness::with_grace_days(7);
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        sub.begin_grace(at("2024-01-08T00:00:00Z"), at(DUE));
        let now = at("2024-01-06T12:00:00Z");
        h.bus.clear();

        {
            let _guard = h.services.lifecycle.lock(&sub.id).await.unwrap();
            h.services
                .retry
                .suspend(&mut sub, None, RETRY_EXHAUSTED, now)
                .await
                .unwrap();
        }

        let stored = h.subscription(&sub.id).await;
        assert_eq!(stored.status, SubscriptionStatus::Active);
        assert_eq!(stored.suspended_reason.as_deref(), Some(RETRY_EXHAUSTED));
        assert_eq!(stored.grace_period_end, Some(at("2024-01-08T00:00:00Z")));
        assert!(!stored.is_due(at("2024-01-07T23:59:59Z")));
        assert!(h.bus.has(NotificationKind::RetryExhausted));
        assert!(!h.bus.has(NotificationKind::StatusChanged));
    }

    #[tokio::test]
    async fn suspension_after_grace_window_moves_to_pending_cancel() {
        let h = Harness::with_grace_days(7);
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        sub.begin_grace(at("2024-01-08T00:00:00Z"), at(DUE));

        {
            let _guard = h.services.lifecycle.lock(&sub.id).await.unwrap();
            h.services
                .retry
                .suspend(&mut sub, None, RETRY_EXHAUSTED, at("2024-01-08T00:00:00Z"))
                .await
                .unwrap();
        }

        assert_eq!(
            h.subscription(&sub.id).await.status,
            SubscriptionStatus::PendingCancel
        );
    }

    #[tokio::test]
    async fn per_subscription_limit_overrides_default() {
        let h = Harness::new();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        sub.max_retry_attempts = Some(1);
        h.gateway.push_decline("insufficient_funds", "Insufficient funds");

        let outcome = first_attempt(&h, &mut sub).await;

        assert_eq!(
            outcome,
            AttemptOutcome::Suspended {
                order_id: Some(h.memory.ledger.orders_for(&sub.id).await[0].id),
                reason: RETRY_EXHAUSTED.to_string(),
            }
        );
    }

    #[tokio::test]
    async fn expired_card_suspends_immediately() {
        let h = Harness::new();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        h.gateway.push_decline("expired_card", "Your card has expired.");

        let outcome = first_attempt(&h, &mut sub).await;

        assert!(matches!(
            outcome,
            AttemptOutcome::Suspended { ref reason, .. } if reason == "payment_failed:card_expired"
        ));
        assert!(h.memory.retries.find_pending(&sub.id).await.unwrap().is_none());
        assert_eq!(h.gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn unrecognized_error_is_not_retried() {
        let h = Harness::new();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        h.gateway.push_decline("zz_new_code", "Something odd happened");

        let outcome = first_attempt(&h, &mut sub).await;

        assert!(matches!(outcome, AttemptOutcome::Suspended { .. }));
    }

    #[tokio::test]
    async fn gateway_timeout_is_retried() {
        let h = Harness::with_settings(BillingSettings {
            retry: RetrySettings {
                charge_timeout: Duration::from_millis(20),
                ..RetrySettings::default()
            },
            ..BillingSettings::default()
        });
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        h.gateway.set_latency(Some(Duration::from_millis(200)));

        let outcome = first_attempt(&h, &mut sub).await;

        assert!(matches!(outcome, AttemptOutcome::RetryScheduled { .. }));
        let orders = h.memory.ledger.orders_for(&sub.id).await;
        assert_eq!(orders[0].status, OrderStatus::Failed);
        assert!(orders[0].last_error.as_deref().unwrap_or_default().contains("timeout"));
    }

    #[tokio::test]
    async fn gateway_unavailable_error_is_retried() {
        let h = Harness::new();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        h.gateway.push_outcome(Err(GatewayError::new(
            crate::ports::GatewayErrorCode::Unavailable,
            "503 from gateway",
        )));

        let outcome = first_attempt(&h, &mut sub).await;

        assert!(matches!(outcome, AttemptOutcome::RetryScheduled { .. }));
    }

    // ══════════════════════════════════════════════════════════════
    // Configuration errors
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn missing_payment_method_suspends_without_charging() {
        let h = Harness::new();
        let mut sub = h.subscription_without_method("2023-12-01T00:00:00Z").await;

        let outcome = first_attempt(&h, &mut sub).await;

        assert!(matches!(
            outcome,
            AttemptOutcome::Suspended { ref reason, .. }
                if reason == "configuration_error:missing_payment_method"
        ));
        assert_eq!(h.gateway.call_count(), 0);
        assert_eq!(
            h.subscription(&sub.id).await.status,
            SubscriptionStatus::PendingCancel
        );
    }

    #[tokio::test]
    async fn unknown_gateway_suspends_without_charging() {
        let h = Harness::new();
        let mut sub = h.subscription_without_method("2023-12-01T00:00:00Z").await;
        h.services
            .vault
            .save(SavePaymentMethod {
                subscription_id: sub.id,
                gateway_id: "paypal".to_string(),
                token: SecretString::new("BA-123".to_string()),
                customer_id: None,
                gateway_customer_id: None,
                is_default: true,
            })
            .await
            .unwrap();

        let outcome = first_attempt(&h, &mut sub).await;

        assert!(matches!(
            outcome,
            AttemptOutcome::Suspended { ref reason, .. }
                if reason == "configuration_error:gateway_not_configured"
        ));
        assert_eq!(h.gateway.call_count(), 0);
    }

    // ══════════════════════════════════════════════════════════════
    // Limits and stale retries
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn payment_limit_expires_without_charging() {
        let h = Harness::new();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        sub.max_payments = 1;
        sub.payments_made = 1;

        let outcome = first_attempt(&h, &mut sub).await;

        assert_eq!(outcome, AttemptOutcome::Expired);
        assert_eq!(h.gateway.call_count(), 0);
        assert_eq!(h.subscription(&sub.id).await.status, SubscriptionStatus::Expired);
    }

    #[tokio::test]
    async fn retry_on_cancelled_subscription_is_abandoned() {
        let h = Harness::new();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        h.gateway.push_decline("insufficient_funds", "Insufficient funds");
        first_attempt(&h, &mut sub).await;
        h.services
            .lifecycle
            .apply_transition(&sub.id, SubscriptionStatus::Cancelled, "customer request")
            .await
            .unwrap();

        let report = h
            .services
            .retry
            .process_due_retries(at("2024-01-02T00:00:00Z"))
            .await
            .unwrap();

        // The cleanup handler already closed it on cancellation.
        assert_eq!(report.due, 0);
        assert_eq!(h.gateway.call_count(), 1);
        assert!(h.memory.retries.find_pending(&sub.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_for_end_of_term_cancellation_cancels_instead_of_charging() {
        let h = Harness::new();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        h.gateway.push_decline("insufficient_funds", "Insufficient funds");
        first_attempt(&h, &mut sub).await;
        h.services
            .lifecycle
            .apply_transition(&sub.id, SubscriptionStatus::PendingCancel, "customer request")
            .await
            .unwrap();

        let report = h
            .services
            .retry
            .process_due_retries(at("2024-01-02T00:00:00Z"))
            .await
            .unwrap();

        assert_eq!(report.cancelled, 1);
        assert_eq!(h.gateway.call_count(), 1);
        assert_eq!(h.subscription(&sub.id).await.status, SubscriptionStatus::Cancelled);
    }

    #[tokio::test]
    async fn paid_order_is_reconciled_without_second_charge() {
        let h = Harness::new();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        h.gateway.push_decline("insufficient_funds", "Insufficient funds");
        first_attempt(&h, &mut sub).await;

        // Order settled out of band, subscription write lost.
        let mut order = h.memory.ledger.orders_for(&sub.id).await.remove(0);
        order.mark_paid(Some("txn_late".into()), at("2024-01-01T12:00:00Z"));
        h.memory.ledger.save_order(&order).await.unwrap();

        let report = h
            .services
            .retry
            .process_due_retries(at("2024-01-02T00:00:00Z"))
            .await
            .unwrap();

        assert_eq!(report.paid, 1);
        assert_eq!(h.gateway.call_count(), 1);
        let stored = h.subscription(&sub.id).await;
        assert_eq!(stored.payments_made, 1);
        assert_eq!(stored.next_date, Some(at("2024-02-01T12:00:00Z")));
    }

    #[tokio::test]
    async fn locked_subscription_is_skipped() {
        let h = Harness::new();
        let mut sub = h.active_subscription("2023-12-01T00:00:00Z").await;
        h.gateway.push_decline("insufficient_funds", "Insufficient funds");
        first_attempt(&h, &mut sub).await;

        let _held = h.services.lifecycle.lock(&sub.id).await.unwrap();
        let report = h
            .services
            .retry
            .process_due_retries(at("2024-01-02T00:00:00Z"))
            .await
            .unwrap();

        assert_eq!(report.skipped_locked, 1);
        assert!(h.memory.retries.find_pending(&sub.id).await.unwrap().is_some());
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let json = serde_json::to_value(AttemptOutcome::Expired).unwrap();
        assert_eq!(json["outcome"], "expired");
    }
}
