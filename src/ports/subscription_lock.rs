//! SubscriptionLock port - serializes read-modify-write per subscription.
//!
//! Scheduler ticks, retry fires and webhook deliveries may touch the same
//! subscription at once, possibly from different processes. Every mutation
//! path takes this lock first.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, SubscriptionId};

/// Held lock. Released on drop.
pub struct SubscriptionLockGuard {
    _inner: Box<dyn Send>,
}

impl SubscriptionLockGuard {
    pub fn new(inner: impl Send + 'static) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

impl std::fmt::Debug for SubscriptionLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SubscriptionLockGuard")
    }
}

#[async_trait]
pub trait SubscriptionLock: Send + Sync {
    /// Waits for the lock.
    async fn acquire(&self, id: &SubscriptionId) -> Result<SubscriptionLockGuard, DomainError>;

    /// Returns `None` immediately when another holder has it.
    async fn try_acquire(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<SubscriptionLockGuard>, DomainError>;
}
