//! Typed lifecycle notifications.
//!
//! Consumed by collaborators outside this crate (email, role mapping,
//! operator alerts) and by internal cleanup handlers.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Money, OrderId, SubscriptionId, Timestamp};

use super::SubscriptionStatus;

/// Discriminant used for subscriber registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    StatusChanged,
    Resumed,
    Cancelled,
    PaymentSuccess,
    PaymentFailed,
    RetryExhausted,
    GracePeriodStarted,
    GracePeriodEnded,
    PaymentMethodSaved,
    PaymentMethodUpdated,
    PaymentMethodDeleted,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 11] = [
        NotificationKind::StatusChanged,
        NotificationKind::Resumed,
        NotificationKind::Cancelled,
        NotificationKind::PaymentSuccess,
        NotificationKind::PaymentFailed,
        NotificationKind::RetryExhausted,
        NotificationKind::GracePeriodStarted,
        NotificationKind::GracePeriodEnded,
        NotificationKind::PaymentMethodSaved,
        NotificationKind::PaymentMethodUpdated,
        NotificationKind::PaymentMethodDeleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::StatusChanged => "status_changed",
            NotificationKind::Resumed => "resumed",
            NotificationKind::Cancelled => "cancelled",
            NotificationKind::PaymentSuccess => "payment_success",
            NotificationKind::PaymentFailed => "payment_failed",
            NotificationKind::RetryExhausted => "retry_exhausted",
            NotificationKind::GracePeriodStarted => "grace_period_started",
            NotificationKind::GracePeriodEnded => "grace_period_ended",
            NotificationKind::PaymentMethodSaved => "payment_method_saved",
            NotificationKind::PaymentMethodUpdated => "payment_method_updated",
            NotificationKind::PaymentMethodDeleted => "payment_method_deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    StatusChanged {
        subscription_id: SubscriptionId,
        old: SubscriptionStatus,
        new: SubscriptionStatus,
        reason: String,
    },
    Resumed {
        subscription_id: SubscriptionId,
    },
    Cancelled {
        subscription_id: SubscriptionId,
    },
    PaymentSuccess {
        subscription_id: SubscriptionId,
        order_id: OrderId,
        amount: Money,
        transaction_id: Option<String>,
    },
    PaymentFailed {
        subscription_id: SubscriptionId,
        order_id: OrderId,
        attempt_number: u32,
        error_code: String,
        retryable: bool,
    },
    RetryExhausted {
        subscription_id: SubscriptionId,
        order_id: Option<OrderId>,
        reason: String,
    },
    GracePeriodStarted {
        subscription_id: SubscriptionId,
        grace_end: Timestamp,
    },
    GracePeriodEnded {
        subscription_id: SubscriptionId,
    },
    PaymentMethodSaved {
        subscription_id: SubscriptionId,
        gateway_id: String,
    },
    PaymentMethodUpdated {
        subscription_id: SubscriptionId,
        gateway_id: String,
    },
    PaymentMethodDeleted {
        subscription_id: SubscriptionId,
        gateway_id: String,
    },
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::StatusChanged { .. } => NotificationKind::StatusChanged,
            Notification::Resumed { .. } => NotificationKind::Resumed,
            Notification::Cancelled { .. } => NotificationKind::Cancelled,
            Notification::PaymentSuccess { .. } => NotificationKind::PaymentSuccess,
            Notification::PaymentFailed { .. } => NotificationKind::PaymentFailed,
            Notification::RetryExhausted { .. } => NotificationKind::RetryExhausted,
            Notification::GracePeriodStarted { .. } => NotificationKind::GracePeriodStarted,
            Notification::GracePeriodEnded { .. } => NotificationKind::GracePeriodEnded,
            Notification::PaymentMethodSaved { .. } => NotificationKind::PaymentMethodSaved,
            Notification::PaymentMethodUpdated { .. } => NotificationKind::PaymentMethodUpdated,
            Notification::PaymentMethodDeleted { .. } => NotificationKind::PaymentMethodDeleted,
        }
    }

    pub fn subscription_id(&self) -> SubscriptionId {
        match self {
            Notification::StatusChanged { subscription_id, .. }
            | Notification::Resumed { subscription_id }
            | Notification::Cancelled { subscription_id }
            | Notification::PaymentSuccess { subscription_id, .. }
            | Notification::PaymentFailed { subscription_id, .. }
            | Notification::RetryExhausted { subscription_id, .. }
            | Notification::GracePeriodStarted { subscription_id, .. }
            | Notification::GracePeriodEnded { subscription_id }
            | Notification::PaymentMethodSaved { subscription_id, .. }
            | Notification::PaymentMethodUpdated { subscription_id, .. }
            | Notification::PaymentMethodDeleted { subscription_id, .. } => *subscription_id,
        }
    }
}
