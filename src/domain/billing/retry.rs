//! Retry state and backoff policy.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::foundation::{OrderId, SubscriptionId, Timestamp, ValidationError};

use super::ChargeFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    Pending,
    Succeeded,
    Failed,
}

impl RetryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryStatus::Pending => "pending",
            RetryStatus::Succeeded => "succeeded",
            RetryStatus::Failed => "failed",
        }
    }
}

impl FromStr for RetryStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RetryStatus::Pending),
            "succeeded" => Ok(RetryStatus::Succeeded),
            "failed" => Ok(RetryStatus::Failed),
            other => Err(ValidationError::invalid_format(
                "retry_status",
                format!("unknown retry status '{}'", other),
            )),
        }
    }
}

/// The single in-flight retry for a subscription.
///
/// `attempt_number` is the attempt that last failed; the scheduled retry
/// runs as `attempt_number + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub subscription_id: SubscriptionId,
    pub order_id: OrderId,
    pub attempt_number: u32,
    pub next_retry_time: Timestamp,
    pub status: RetryStatus,
    pub last_error: Option<String>,
    pub updated_at: Timestamp,
}

impl RetryState {
    pub fn pending(
        subscription_id: SubscriptionId,
        order_id: OrderId,
        attempt_number: u32,
        next_retry_time: Timestamp,
        last_error: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            subscription_id,
            order_id,
            attempt_number,
            next_retry_time,
            status: RetryStatus::Pending,
            last_error: Some(last_error.into()),
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RetryStatus::Pending
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.is_pending() && self.next_retry_time <= now
    }

    pub fn next_attempt(&self) -> u32 {
        self.attempt_number + 1
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry { next_retry_time: Timestamp },
    Exhausted,
    NonRetryable,
}

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    intervals_days: Vec<u32>,
    backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            intervals_days: vec![1, 3, 7],
            backoff_multiplier: 1.5,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        intervals_days: Vec<u32>,
        backoff_multiplier: f64,
    ) -> Result<Self, ValidationError> {
        if max_attempts == 0 {
            return Err(ValidationError::out_of_range("max_attempts", 1, 100, 0));
        }
        if intervals_days.is_empty() {
            return Err(ValidationError::empty_field("retry_intervals_days"));
        }
        if intervals_days.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(ValidationError::invalid_format(
                "retry_intervals_days",
                "intervals must not decrease",
            ));
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(ValidationError::invalid_format(
                "backoff_multiplier",
                "must be a finite number >= 1.0",
            ));
        }
        Ok(Self {
            max_attempts,
            intervals_days,
            backoff_multiplier,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `base[min(n-1, len-1)] days * multiplier^(n-1)`, at least one hour.
    pub fn delay(&self, attempt_number: u32) -> Duration {
        let n = attempt_number.max(1);
        let idx = ((n - 1) as usize).min(self.intervals_days.len() - 1);
        let base_secs = self.intervals_days[idx] as f64 * 86_400.0;
        let secs = base_secs * self.backoff_multiplier.powi(n as i32 - 1);

        // Clamp before converting; very large attempt numbers overflow f64 -> i64.
        let secs = secs.clamp(3_600.0, 365.0 * 86_400.0);
        Duration::seconds(secs.round() as i64)
    }

    /// Decides what follows a failure of `attempt_number` under `limit`
    /// (the subscription's override or `max_attempts`).
    pub fn decide(
        &self,
        failure: &ChargeFailure,
        attempt_number: u32,
        limit: u32,
        now: Timestamp,
    ) -> RetryDecision {
        if !failure.is_retryable() {
            RetryDecision::NonRetryable
        } else if attempt_number < limit {
            RetryDecision::Retry {
                next_retry_time: now.plus(self.delay(attempt_number)),
            }
        } else {
            RetryDecision::Exhausted
        }
    }
}
