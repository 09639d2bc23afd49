//! In-memory delayed task queue.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp};
use crate::ports::{DelayedTask, DelayedTaskQueue, TaskKind};

#[derive(Default)]
pub struct InMemoryDelayedTaskQueue {
    tasks: RwLock<HashMap<(SubscriptionId, TaskKind), Timestamp>>,
}

impl InMemoryDelayedTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DelayedTaskQueue for InMemoryDelayedTaskQueue {
    async fn schedule(&self, task: &DelayedTask) -> Result<(), DomainError> {
        self.tasks
            .write()
            .await
            .insert((task.subscription_id, task.kind), task.run_at);
        Ok(())
    }

    async fn cancel(
        &self,
        subscription_id: &SubscriptionId,
        kind: TaskKind,
    ) -> Result<bool, DomainError> {
        Ok(self.tasks.write().await.remove(&(*subscription_id, kind)).is_some())
    }

    async fn cancel_all(&self, subscription_id: &SubscriptionId) -> Result<(), DomainError> {
        self.tasks
            .write()
            .await
            .retain(|(id, _), _| id != subscription_id);
        Ok(())
    }

    async fn due(&self, now: Timestamp, limit: u32) -> Result<Vec<DelayedTask>, DomainError> {
        let tasks = self.tasks.read().await;
        let mut due: Vec<DelayedTask> = tasks
            .iter()
            .filter(|(_, run_at)| **run_at <= now)
            .map(|((subscription_id, kind), run_at)| DelayedTask {
                subscription_id: *subscription_id,
                kind: *kind,
                run_at: *run_at,
            })
            .collect();
        due.sort_by_key(|t| (t.run_at, t.subscription_id));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn complete(&self, task: &DelayedTask) -> Result<(), DomainError> {
        let mut tasks = self.tasks.write().await;
        let key = (task.subscription_id, task.kind);
        if tasks.get(&key) == Some(&task.run_at) {
            tasks.remove(&key);
        }
        Ok(())
    }

    async fn find(
        &self,
        subscription_id: &SubscriptionId,
        kind: TaskKind,
    ) -> Result<Option<DelayedTask>, DomainError> {
        Ok(self
            .tasks
            .read()
            .await
            .get(&(*subscription_id, kind))
            .map(|run_at| DelayedTask {
                subscription_id: *subscription_id,
                kind,
                run_at: *run_at,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rescheduled_task_survives_completion_of_the_old_one() {
        let queue = InMemoryDelayedTaskQueue::new();
        let id = SubscriptionId::new();
        let now = Timestamp::now();
        let first = DelayedTask {
            subscription_id: id,
            kind: TaskKind::GracePeriodEnd,
            run_at: now,
        };
        queue.schedule(&first).await.unwrap();
        let second = DelayedTask {
            run_at: now.add_days(3),
            ..first.clone()
        };
        queue.schedule(&second).await.unwrap();

        queue.complete(&first).await.unwrap();
        assert_eq!(queue.find(&id, TaskKind::GracePeriodEnd).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn due_only_returns_elapsed_tasks() {
        let queue = InMemoryDelayedTaskQueue::new();
        let now = Timestamp::now();
        for days in [-1, 1] {
            queue
                .schedule(&DelayedTask {
                    subscription_id: SubscriptionId::new(),
                    kind: TaskKind::GracePeriodEnd,
                    run_at: now.add_days(days),
                })
                .await
                .unwrap();
        }
        assert_eq!(queue.due(now, 10).await.unwrap().len(), 1);
    }
}
