//! Human-readable subscription history.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::foundation::{SubscriptionId, Timestamp, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Created,
    StatusChange,
    PaymentSuccess,
    PaymentFailure,
    RetryScheduled,
    Suspension,
    GracePeriod,
    Webhook,
    Restore,
}

impl ActivityType {
    const ALL: [ActivityType; 9] = [
        ActivityType::Created,
        ActivityType::StatusChange,
        ActivityType::PaymentSuccess,
        ActivityType::PaymentFailure,
        ActivityType::RetryScheduled,
        ActivityType::Suspension,
        ActivityType::GracePeriod,
        ActivityType::Webhook,
        ActivityType::Restore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Created => "created",
            ActivityType::StatusChange => "status_change",
            ActivityType::PaymentSuccess => "payment_success",
            ActivityType::PaymentFailure => "payment_failure",
            ActivityType::RetryScheduled => "retry_scheduled",
            ActivityType::Suspension => "suspension",
            ActivityType::GracePeriod => "grace_period",
            ActivityType::Webhook => "webhook",
            ActivityType::Restore => "restore",
        }
    }
}

impl FromStr for ActivityType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| {
                ValidationError::invalid_format("activity", format!("unknown activity '{}'", s))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionNote {
    pub subscription_id: SubscriptionId,
    pub activity: ActivityType,
    pub message: String,
    pub created_at: Timestamp,
}

impl SubscriptionNote {
    pub fn new(
        subscription_id: SubscriptionId,
        activity: ActivityType,
        message: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            subscription_id,
            activity,
            message: message.into(),
            created_at,
        }
    }
}
