//! Subscription aggregate.
//!
//! Fields are public for adapters and read paths, but every mutation goes
//! through `SubscriptionLifecycle` in the application layer, which holds
//! the per-subscription lock and persists with an optimistic version check.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{
    Money, OrderId, OrderItemId, OwnerId, StateMachine, SubscriptionId, Timestamp,
    ValidationError,
};

use super::{BillingPeriod, SubscriptionStatus};

/// Parameters supplied by the order-processing collaborator when a
/// subscribable line item is activated.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub owner_id: OwnerId,
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub price: Money,
    pub signup_fee: Money,
    pub schedule: BillingPeriod,
    pub trial: Option<BillingPeriod>,
    pub start_date: Timestamp,
    pub max_payments: u32,
    pub auto_renew: bool,
    pub user_cancel_allowed: bool,
    /// Overrides the configured retry limit for this subscription.
    pub max_retry_attempts: Option<u32>,
    pub initial_status: SubscriptionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub owner_id: OwnerId,
    pub status: SubscriptionStatus,
    pub schedule: BillingPeriod,
    /// Present only until the first real charge.
    pub trial: Option<BillingPeriod>,
    pub price: Money,
    pub signup_fee: Money,
    pub start_date: Timestamp,
    pub next_date: Option<Timestamp>,
    /// 0 means unlimited.
    pub max_payments: u32,
    pub payments_made: u32,
    pub auto_renew: bool,
    pub user_cancel_allowed: bool,
    pub grace_period_end: Option<Timestamp>,
    pub suspended_reason: Option<String>,
    pub max_retry_attempts: Option<u32>,
    /// Status held before being moved to trash, for restore.
    pub trashed_from: Option<SubscriptionStatus>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Optimistic concurrency token, bumped by the ledger on every update.
    pub version: i64,
}

impl Subscription {
    pub fn create(params: NewSubscription, now: Timestamp) -> Result<Self, ValidationError> {
        if params.signup_fee.currency() != params.price.currency() {
            return Err(ValidationError::invalid_format(
                "signup_fee",
                "currency must match the subscription price",
            ));
        }
        if !matches!(
            params.initial_status,
            SubscriptionStatus::Draft | SubscriptionStatus::Pending | SubscriptionStatus::Active
        ) {
            return Err(ValidationError::invalid_format(
                "initial_status",
                format!("cannot create a subscription as {}", params.initial_status),
            ));
        }
        if params.max_retry_attempts == Some(0) {
            return Err(ValidationError::out_of_range("max_retry_attempts", 1, 100, 0));
        }

        let next_date = match params.initial_status {
            SubscriptionStatus::Draft => None,
            _ => Some(match params.trial {
                Some(trial) => trial.advance(params.start_date),
                None => params.schedule.advance(params.start_date),
            }),
        };

        Ok(Self {
            id: SubscriptionId::new(),
            owner_id: params.owner_id,
            status: params.initial_status,
            schedule: params.schedule,
            trial: params.trial,
            price: params.price,
            signup_fee: params.signup_fee,
            start_date: params.start_date,
            next_date,
            max_payments: params.max_payments,
            payments_made: 0,
            auto_renew: params.auto_renew,
            user_cancel_allowed: params.user_cancel_allowed,
            grace_period_end: None,
            suspended_reason: None,
            max_retry_attempts: params.max_retry_attempts,
            trashed_from: None,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// Mirrors the ledger's due query: renewable, not suspended, and either
    /// a passed `next_date` or a trial-less record whose first date was
    /// never set.
    pub fn is_due(&self, now: Timestamp) -> bool {
        if !self.status.is_renewable() || self.is_suspended() {
            return false;
        }
        match self.next_date {
            Some(next) => next <= now,
            None => self.trial.is_none() && self.start_date <= now,
        }
    }

    pub fn has_reached_payment_limit(&self) -> bool {
        self.max_payments > 0 && self.payments_made >= self.max_payments
    }

    pub fn retry_limit(&self, default_max_attempts: u32) -> u32 {
        self.max_retry_attempts.unwrap_or(default_max_attempts)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended_reason.is_some()
    }

    /// Date from which a missed renewal is measured.
    pub fn due_date(&self) -> Timestamp {
        self.next_date.unwrap_or(self.start_date)
    }

    pub fn grace_end_for(&self, grace_days: u32) -> Timestamp {
        self.due_date().add_days(grace_days as i64)
    }

    /// Validates and applies a status change, returning the previous status.
    pub fn change_status(
        &mut self,
        target: SubscriptionStatus,
        now: Timestamp,
    ) -> Result<SubscriptionStatus, ValidationError> {
        let old = self.status;
        self.status = old.transition_to(target)?;
        match target {
            SubscriptionStatus::Trash => self.trashed_from = Some(old),
            SubscriptionStatus::Active => self.suspended_reason = None,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired => {
                self.grace_period_end = None;
            }
            _ => {}
        }
        self.updated_at = now;
        Ok(old)
    }

    /// Moves a trashed record back to the status it had before.
    pub fn restore_from_trash(
        &mut self,
        now: Timestamp,
    ) -> Result<SubscriptionStatus, ValidationError> {
        if self.status != SubscriptionStatus::Trash {
            return Err(ValidationError::invalid_format(
                "status",
                format!("only trashed subscriptions can be restored, found {}", self.status),
            ));
        }
        let restored = self.trashed_from.take().unwrap_or(SubscriptionStatus::Pending);
        self.status = restored;
        self.updated_at = now;
        Ok(restored)
    }

    /// Applies a successful renewal charge made at `paid_at`.
    pub fn record_renewal_payment(&mut self, paid_at: Timestamp) -> Result<(), ValidationError> {
        if self.has_reached_payment_limit() {
            return Err(ValidationError::out_of_range(
                "payments_made",
                0,
                self.max_payments as i64,
                self.payments_made as i64 + 1,
            ));
        }
        self.payments_made += 1;
        self.next_date = Some(self.schedule.advance(paid_at));
        self.trial = None;
        self.grace_period_end = None;
        self.suspended_reason = None;
        self.updated_at = paid_at;
        Ok(())
    }

    pub fn begin_grace(&mut self, grace_end: Timestamp, now: Timestamp) {
        self.grace_period_end = Some(grace_end);
        self.updated_at = now;
    }

    pub fn suspend(&mut self, reason: impl Into<String>, now: Timestamp) {
        self.suspended_reason = Some(reason.into());
        self.updated_at = now;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::{DateTime, Utc};

    pub fn at(s: &str) -> Timestamp {
        Timestamp::from_datetime(DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc))
    }

    pub fn monthly_params(start: Timestamp) -> NewSubscription {
        NewSubscription {
            owner_id: OwnerId::new(),
            order_id: OrderId::new(),
            order_item_id: OrderItemId::new(),
            price: Money::parse("19.99", "USD").unwrap(),
            signup_fee: Money::zero("USD").unwrap(),
            schedule: BillingPeriod::monthly(),
            trial: None,
            start_date: start,
            max_payments: 0,
            auto_renew: true,
            user_cancel_allowed: true,
            max_retry_attempts: None,
            initial_status: SubscriptionStatus::Active,
        }
    }
}
