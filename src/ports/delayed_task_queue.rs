//! DelayedTaskQueue port - one-shot callbacks at a future time.
//!
//! Tasks are keyed by `(subscription_id, kind)`: scheduling again replaces
//! the previous task. Handlers must re-check subscription state when a
//! task fires, since it may have changed after scheduling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Re-evaluate a subscription when its grace window closes.
    GracePeriodEnd,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::GracePeriodEnd => "grace_period_end",
        }
    }
}

impl FromStr for TaskKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grace_period_end" => Ok(TaskKind::GracePeriodEnd),
            other => Err(ValidationError::invalid_format(
                "task_kind",
                format!("unknown task kind '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayedTask {
    pub subscription_id: SubscriptionId,
    pub kind: TaskKind,
    pub run_at: Timestamp,
}

#[async_trait]
pub trait DelayedTaskQueue: Send + Sync {
    /// Schedules or reschedules the task for its `(subscription_id, kind)`.
    async fn schedule(&self, task: &DelayedTask) -> Result<(), DomainError>;

    /// Returns false when no such task was scheduled.
    async fn cancel(
        &self,
        subscription_id: &SubscriptionId,
        kind: TaskKind,
    ) -> Result<bool, DomainError>;

    async fn cancel_all(&self, subscription_id: &SubscriptionId) -> Result<(), DomainError>;

    /// Tasks with `run_at <= now`, earliest first. Tasks stay queued until
    /// `complete` is called.
    async fn due(&self, now: Timestamp, limit: u32) -> Result<Vec<DelayedTask>, DomainError>;

    /// Removes a fired task, unless it was rescheduled to a different
    /// `run_at` in the meantime.
    async fn complete(&self, task: &DelayedTask) -> Result<(), DomainError>;

    async fn find(
        &self,
        subscription_id: &SubscriptionId,
        kind: TaskKind,
    ) -> Result<Option<DelayedTask>, DomainError>;
}
