//! In-process subscription locks.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::foundation::{DomainError, SubscriptionId};
use crate::ports::{SubscriptionLock, SubscriptionLockGuard};

/// One async mutex per subscription. Only serializes within this process;
/// multi-instance deployments use the advisory-lock adapter.
#[derive(Default)]
pub struct InMemorySubscriptionLock {
    locks: Mutex<HashMap<SubscriptionId, Arc<Mutex<()>>>>,
}

impl InMemorySubscriptionLock {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, id: &SubscriptionId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // Drop slots nobody holds or waits on.
        locks.retain(|_, slot| Arc::strong_count(slot) > 1);
        locks.entry(*id).or_default().clone()
    }
}

#[async_trait]
impl SubscriptionLock for InMemorySubscriptionLock {
    async fn acquire(&self, id: &SubscriptionId) -> Result<SubscriptionLockGuard, DomainError> {
        let guard = self.slot(id).await.lock_owned().await;
        Ok(SubscriptionLockGuard::new(guard))
    }

    async fn try_acquire(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<SubscriptionLockGuard>, DomainError> {
        Ok(self
            .slot(id)
            .await
            .try_lock_owned()
            .ok()
            .map(SubscriptionLockGuard::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_acquire_fails_while_held_and_succeeds_after_drop() {
        let locks = InMemorySubscriptionLock::new();
        let id = SubscriptionId::new();

        let guard = locks.acquire(&id).await.unwrap();
        assert!(locks.try_acquire(&id).await.unwrap().is_none());
        assert!(locks.try_acquire(&SubscriptionId::new()).await.unwrap().is_some());

        drop(guard);
        assert!(locks.try_acquire(&id).await.unwrap().is_some());
    }
}
