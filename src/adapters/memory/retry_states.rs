//! In-memory retry state repository.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::billing::{RetryState, RetryStatus};
use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp};
use crate::ports::RetryStateRepository;

#[derive(Default)]
pub struct InMemoryRetryStateRepository {
    states: RwLock<Vec<RetryState>>,
}

impl InMemoryRetryStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row ever stored for a subscription, including resolved ones.
    pub async fn history(&self, subscription_id: &SubscriptionId) -> Vec<RetryState> {
        self.states
            .read()
            .await
            .iter()
            .filter(|s| s.subscription_id == *subscription_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RetryStateRepository for InMemoryRetryStateRepository {
    async fn upsert_pending(&self, state: &RetryState) -> Result<(), DomainError> {
        let mut states = self.states.write().await;
        let mut pending = state.clone();
        pending.status = RetryStatus::Pending;
        match states
            .iter_mut()
            .find(|s| s.subscription_id == state.subscription_id && s.is_pending())
        {
            Some(existing) => *existing = pending,
            None => states.push(pending),
        }
        Ok(())
    }

    async fn find_pending(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<RetryState>, DomainError> {
        Ok(self
            .states
            .read()
            .await
            .iter()
            .find(|s| s.subscription_id == *subscription_id && s.is_pending())
            .cloned())
    }

    async fn find_due(&self, now: Timestamp, limit: u32) -> Result<Vec<RetryState>, DomainError> {
        let states = self.states.read().await;
        let mut due: Vec<RetryState> = states.iter().filter(|s| s.is_due(now)).cloned().collect();
        due.sort_by_key(|s| s.next_retry_time);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn resolve(
        &self,
        subscription_id: &SubscriptionId,
        status: RetryStatus,
        last_error: Option<&str>,
        now: Timestamp,
    ) -> Result<bool, DomainError> {
        let mut states = self.states.write().await;
        match states
            .iter_mut()
            .find(|s| s.subscription_id == *subscription_id && s.is_pending())
        {
            Some(state) => {
                state.status = status;
                if let Some(error) = last_error {
                    state.last_error = Some(error.to_string());
                }
                state.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_for(&self, subscription_id: &SubscriptionId) -> Result<(), DomainError> {
        self.states
            .write()
            .await
            .retain(|s| s.subscription_id != *subscription_id);
        Ok(())
    }
}
