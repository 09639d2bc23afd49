//! PostgreSQL implementation of RetryStateRepository.
//!
//! One pending row per subscription (`retry_states_single_pending`);
//! resolved rows stay behind as history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::{RetryState, RetryStatus};
use crate::domain::foundation::{DomainError, OrderId, SubscriptionId, Timestamp};
use crate::ports::RetryStateRepository;

use super::common::{corrupt, db_error, to_i32, to_u32, ts};

pub struct PostgresRetryStateRepository {
    pool: PgPool,
}

impl PostgresRetryStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RetryRow {
    subscription_id: Uuid,
    order_id: Uuid,
    attempt_number: i32,
    next_retry_time: DateTime<Utc>,
    status: String,
    last_error: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RetryRow> for RetryState {
    type Error = DomainError;

    fn try_from(row: RetryRow) -> Result<Self, Self::Error> {
        Ok(RetryState {
            subscription_id: SubscriptionId::from_uuid(row.subscription_id),
            order_id: OrderId::from_uuid(row.order_id),
            attempt_number: to_u32("attempt_number", row.attempt_number)?,
            next_retry_time: ts(row.next_retry_time),
            status: row
                .status
                .parse::<RetryStatus>()
                .map_err(|e| corrupt("retry status", e))?,
            last_error: row.last_error,
            updated_at: ts(row.updated_at),
        })
    }
}

#[async_trait]
impl RetryStateRepository for PostgresRetryStateRepository {
    async fn upsert_pending(&self, state: &RetryState) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO retry_states (
                subscription_id, order_id, attempt_number, next_retry_time, status,
                last_error, updated_at
            ) VALUES ($1, $2, $3, $4, 'pending', $5, $6)
            ON CONFLICT (subscription_id) WHERE status = 'pending' DO UPDATE SET
                order_id = EXCLUDED.order_id,
                attempt_number = EXCLUDED.attempt_number,
                next_retry_time = EXCLUDED.next_retry_time,
                last_error = EXCLUDED.last_error,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(state.subscription_id.as_uuid())
        .bind(state.order_id.as_uuid())
        .bind(to_i32("attempt_number", state.attempt_number)?)
        .bind(state.next_retry_time.as_datetime())
        .bind(&state.last_error)
        .bind(state.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to upsert retry state", e))?;
        Ok(())
    }

    async fn find_pending(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<RetryState>, DomainError> {
        let row: Option<RetryRow> = sqlx::query_as(
            r#"
            SELECT subscription_id, order_id, attempt_number, next_retry_time, status,
                   last_error, updated_at
            FROM retry_states
            WHERE subscription_id = $1 AND status = 'pending'
            "#,
        )
        .bind(subscription_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load retry state", e))?;
        row.map(RetryState::try_from).transpose()
    }

    async fn find_due(&self, now: Timestamp, limit: u32) -> Result<Vec<RetryState>, DomainError> {
        let rows: Vec<RetryRow> = sqlx::query_as(
            r#"
            SELECT subscription_id, order_id, attempt_number, next_retry_time, status,
                   last_error, updated_at
            FROM retry_states
            WHERE status = 'pending' AND next_retry_time <= $1
            ORDER BY next_retry_time
            LIMIT $2
            "#,
        )
        .bind(now.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to query due retries", e))?;
        rows.into_iter().map(RetryState::try_from).collect()
    }

    async fn resolve(
        &self,
        subscription_id: &SubscriptionId,
        status: RetryStatus,
        last_error: Option<&str>,
        now: Timestamp,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE retry_states SET
                status = $2,
                last_error = COALESCE($3, last_error),
                updated_at = $4
            WHERE subscription_id = $1 AND status = 'pending'
            "#,
        )
        .bind(subscription_id.as_uuid())
        .bind(status.as_str())
        .bind(last_error)
        .bind(now.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to resolve retry state", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_for(&self, subscription_id: &SubscriptionId) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM retry_states WHERE subscription_id = $1")
            .bind(subscription_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to delete retry states", e))?;
        Ok(())
    }
}
