//! Notification ports - typed publish/subscribe for lifecycle notifications.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::foundation::DomainError;
use crate::domain::subscription::{Notification, NotificationKind};

/// Receives notifications of the kinds it subscribed to.
///
/// Handlers should be idempotent; a failing handler does not stop
/// delivery to the others.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, notification: &Notification) -> Result<(), DomainError>;

    /// Handler name for logging.
    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, notification: Notification) -> Result<(), DomainError>;

    async fn publish_all(&self, notifications: Vec<Notification>) -> Result<(), DomainError> {
        for notification in notifications {
            self.publish(notification).await?;
        }
        Ok(())
    }
}

pub trait NotificationSubscriber: Send + Sync {
    fn subscribe(&self, kind: NotificationKind, handler: Arc<dyn NotificationHandler>);

    fn subscribe_all(&self, kinds: &[NotificationKind], handler: Arc<dyn NotificationHandler>) {
        for kind in kinds {
            self.subscribe(*kind, handler.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_publisher_object_safe(_: &dyn NotificationPublisher) {}

    #[allow(dead_code)]
    fn assert_subscriber_object_safe(_: &dyn NotificationSubscriber) {}
}
