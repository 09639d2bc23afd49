//! In-process notification bus.
//!
//! Delivers each notification to the handlers registered for its kind, in
//! registration order. A failing handler is logged and does not stop the
//! others: by the time a notification is published the state change is
//! already persisted.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::domain::foundation::DomainError;
use crate::domain::subscription::{Notification, NotificationKind};
use crate::ports::{NotificationHandler, NotificationPublisher, NotificationSubscriber};

#[derive(Default)]
pub struct NotificationBus {
    handlers: RwLock<HashMap<NotificationKind, Vec<Arc<dyn NotificationHandler>>>>,
    record: bool,
    published: RwLock<Vec<Notification>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus that also keeps every published notification, for assertions.
    pub fn recording() -> Self {
        Self {
            record: true,
            ..Self::default()
        }
    }

    // === Test Helpers ===

    pub fn published(&self) -> Vec<Notification> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn published_of_kind(&self, kind: NotificationKind) -> Vec<Notification> {
        self.published()
            .into_iter()
            .filter(|n| n.kind() == kind)
            .collect()
    }

    pub fn count_of_kind(&self, kind: NotificationKind) -> usize {
        self.published_of_kind(kind).len()
    }

    pub fn has(&self, kind: NotificationKind) -> bool {
        self.count_of_kind(kind) > 0
    }

    pub fn clear(&self) {
        self.published
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl NotificationPublisher for NotificationBus {
    async fn publish(&self, notification: Notification) -> Result<(), DomainError> {
        if self.record {
            self.published
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(notification.clone());
        }

        // Clone handlers to release the lock before awaiting.
        let handlers: Vec<Arc<dyn NotificationHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&notification.kind())
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            if let Err(e) = handler.handle(&notification).await {
                tracing::error!(
                    handler = handler.name(),
                    kind = notification.kind().as_str(),
                    subscription_id = %notification.subscription_id(),
                    error = %e,
                    "Notification handler failed"
                );
            }
        }
        Ok(())
    }
}

impl NotificationSubscriber for NotificationBus {
    fn subscribe(&self, kind: NotificationKind, handler: Arc<dyn NotificationHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{ErrorCode, SubscriptionId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl NotificationHandler for Counter {
        async fn handle(&self, _: &Notification) -> Result<(), DomainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(DomainError::new(ErrorCode::InternalError, "boom"))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &'static str {
            "Counter"
        }
    }

    fn counter(fail: bool) -> Arc<Counter> {
        Arc::new(Counter {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    fn cancelled() -> Notification {
        Notification::Cancelled {
            subscription_id: SubscriptionId::new(),
        }
    }

    #[tokio::test]
    async fn delivers_only_to_subscribed_kinds() {
        let bus = NotificationBus::new();
        let on_cancel = counter(false);
        let on_resume = counter(false);
        bus.subscribe(NotificationKind::Cancelled, on_cancel.clone());
        bus.subscribe(NotificationKind::Resumed, on_resume.clone());

        bus.publish(cancelled()).await.unwrap();

        assert_eq!(on_cancel.calls.load(Ordering::SeqCst), 1);
        assert_eq!(on_resume.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_others() {
        let bus = NotificationBus::new();
        let failing = counter(true);
        let healthy = counter(false);
        bus.subscribe_all(&[NotificationKind::Cancelled], failing.clone());
        bus.subscribe(NotificationKind::Cancelled, healthy.clone());

        assert!(bus.publish(cancelled()).await.is_ok());
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recording_bus_keeps_published_notifications() {
        let bus = NotificationBus::recording();
        bus.publish(cancelled()).await.unwrap();
        assert!(bus.has(NotificationKind::Cancelled));
        assert_eq!(bus.count_of_kind(NotificationKind::Resumed), 0);

        bus.clear();
        assert!(bus.published().is_empty());
    }
}
