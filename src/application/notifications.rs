//! Built-in notification handlers.
//!
//! Handlers run inside `publish`, which is called while the publishing
//! service still holds the subscription lock. They must not take that
//! lock again.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::billing::RetryStatus;
use crate::domain::foundation::{DomainError, Timestamp};
use crate::domain::subscription::{Notification, NotificationKind, SubscriptionStatus};
use crate::ports::{DelayedTaskQueue, NotificationHandler, RetryStateRepository};

/// Closes retry state and delayed tasks once a subscription can no longer
/// renew, whoever ended it.
pub struct RetryCleanupHandler {
    retries: Arc<dyn RetryStateRepository>,
    tasks: Arc<dyn DelayedTaskQueue>,
}

impl RetryCleanupHandler {
    pub const KINDS: [NotificationKind; 2] =
        [NotificationKind::Cancelled, NotificationKind::StatusChanged];

    pub fn new(retries: Arc<dyn RetryStateRepository>, tasks: Arc<dyn DelayedTaskQueue>) -> Self {
        Self { retries, tasks }
    }
}

#[async_trait]
impl NotificationHandler for RetryCleanupHandler {
    async fn handle(&self, notification: &Notification) -> Result<(), DomainError> {
        let ended = match notification {
            Notification::Cancelled { .. } => true,
            Notification::StatusChanged { new, .. } => matches!(
                new,
                SubscriptionStatus::Expired | SubscriptionStatus::Trash
            ),
            _ => false,
        };
        if !ended {
            return Ok(());
        }

        let id = notification.subscription_id();
        let resolved = self
            .retries
            .resolve(&id, RetryStatus::Failed, Some("subscription ended"), Timestamp::now())
            .await?;
        self.tasks.cancel_all(&id).await?;
        if resolved {
            tracing::info!(subscription_id = %id, "Closed pending retry for ended subscription");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "RetryCleanupHandler"
    }
}

/// Structured log line per notification.
#[derive(Default)]
pub struct LoggingNotificationHandler;

#[async_trait]
impl NotificationHandler for LoggingNotificationHandler {
    async fn handle(&self, notification: &Notification) -> Result<(), DomainError> {
        tracing::info!(
            kind = notification.kind().as_str(),
            subscription_id = %notification.subscription_id(),
            "Notification"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LoggingNotificationHandler"
    }
}
