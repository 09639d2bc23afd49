//! PostgreSQL implementation of DelayedTaskQueue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp};
use crate::ports::{DelayedTask, DelayedTaskQueue, TaskKind};

use super::common::{corrupt, db_error, ts};

pub struct PostgresDelayedTaskQueue {
    pool: PgPool,
}

impl PostgresDelayedTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    subscription_id: Uuid,
    kind: String,
    run_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for DelayedTask {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(DelayedTask {
            subscription_id: SubscriptionId::from_uuid(row.subscription_id),
            kind: row.kind.parse::<TaskKind>().map_err(|e| corrupt("task kind", e))?,
            run_at: ts(row.run_at),
        })
    }
}

#[async_trait]
impl DelayedTaskQueue for PostgresDelayedTaskQueue {
    async fn schedule(&self, task: &DelayedTask) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO delayed_tasks (subscription_id, kind, run_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (subscription_id, kind) DO UPDATE SET run_at = EXCLUDED.run_at
            "#,
        )
        .bind(task.subscription_id.as_uuid())
        .bind(task.kind.as_str())
        .bind(task.run_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to schedule task", e))?;
        Ok(())
    }

    async fn cancel(
        &self,
        subscription_id: &SubscriptionId,
        kind: TaskKind,
    ) -> Result<bool, DomainError> {
        let result =
            sqlx::query("DELETE FROM delayed_tasks WHERE subscription_id = $1 AND kind = $2")
                .bind(subscription_id.as_uuid())
                .bind(kind.as_str())
                .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to cancel task", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_all(&self, subscription_id: &SubscriptionId) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM delayed_tasks WHERE subscription_id = $1")
            .bind(subscription_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to cancel tasks", e))?;
        Ok(())
    }

    async fn due(&self, now: Timestamp, limit: u32) -> Result<Vec<DelayedTask>, DomainError> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"
            SELECT subscription_id, kind, run_at
            FROM delayed_tasks
            WHERE run_at <= $1
            ORDER BY run_at, subscription_id
            LIMIT $2
            "#,
        )
        .bind(now.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to query due tasks", e))?;
        rows.into_iter().map(DelayedTask::try_from).collect()
    }

    async fn complete(&self, task: &DelayedTask) -> Result<(), DomainError> {
        sqlx::query(
            "DELETE FROM delayed_tasks WHERE subscription_id = $1 AND kind = $2 AND run_at = $3",
        )
        .bind(task.subscription_id.as_uuid())
        .bind(task.kind.as_str())
        .bind(task.run_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to complete task", e))?;
        Ok(())
    }

    async fn find(
        &self,
        subscription_id: &SubscriptionId,
        kind: TaskKind,
    ) -> Result<Option<DelayedTask>, DomainError> {
        let row: Option<TaskRow> = sqlx::query_as(
            r#"
            SELECT subscription_id, kind, run_at FROM delayed_tasks
            WHERE subscription_id = $1 AND kind = $2
            "#,
        )
        .bind(subscription_id.as_uuid())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load task", e))?;
        row.map(DelayedTask::try_from).transpose()
    }
}
