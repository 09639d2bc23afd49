//! PostgreSQL implementation of WebhookEventRepository.
//!
//! The `(gateway_id, event_id)` primary key makes concurrent deliveries of
//! one event race on a single row; the claim is taken with one conditional
//! upsert so exactly one of them wins.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{DomainError, ErrorCode, OrderId, SubscriptionId, Timestamp};
use crate::domain::webhook::{ClaimResult, WebhookEvent};
use crate::ports::WebhookEventRepository;

use super::common::{db_error, ts};

pub struct PostgresWebhookEventRepository {
    pool: PgPool,
}

impl PostgresWebhookEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WebhookEventRow {
    gateway_id: String,
    event_id: String,
    event_type: String,
    subscription_id: Option<Uuid>,
    order_id: Option<Uuid>,
    payload: serde_json::Value,
    processed: bool,
    claimed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl From<WebhookEventRow> for WebhookEvent {
    fn from(row: WebhookEventRow) -> Self {
        WebhookEvent {
            gateway_id: row.gateway_id,
            event_id: row.event_id,
            event_type: row.event_type,
            subscription_id: row.subscription_id.map(SubscriptionId::from_uuid),
            order_id: row.order_id.map(OrderId::from_uuid),
            payload: row.payload,
            processed: row.processed,
            claimed_at: row.claimed_at.map(ts),
            last_error: row.last_error,
            created_at: ts(row.created_at),
            processed_at: row.processed_at.map(ts),
        }
    }
}

fn not_found() -> DomainError {
    DomainError::new(ErrorCode::WebhookEventNotFound, "Webhook event not found")
}

#[async_trait]
impl WebhookEventRepository for PostgresWebhookEventRepository {
    async fn claim(
        &self,
        event: &WebhookEvent,
        lease: Duration,
        now: Timestamp,
    ) -> Result<ClaimResult, DomainError> {
        let stale_before = now.plus(-lease);

        // Inserts a new row, or takes over an unprocessed row whose claim
        // was released or outlived the lease. Returns a row only on success.
        let claimed: Option<(bool,)> = sqlx::query_as(
            r#"
            INSERT INTO webhook_events (
                gateway_id, event_id, event_type, subscription_id, order_id, payload,
                processed, claimed_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7, $7)
            ON CONFLICT (gateway_id, event_id) DO UPDATE SET claimed_at = EXCLUDED.claimed_at
            WHERE NOT webhook_events.processed
              AND (webhook_events.claimed_at IS NULL OR webhook_events.claimed_at <= $8)
            RETURNING TRUE
            "#,
        )
        .bind(&event.gateway_id)
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(event.subscription_id.map(|id| *id.as_uuid()))
        .bind(event.order_id.map(|id| *id.as_uuid()))
        .bind(&event.payload)
        .bind(now.as_datetime())
        .bind(stale_before.as_datetime())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to claim webhook event", e))?;

        if claimed.is_some() {
            return Ok(ClaimResult::Claimed);
        }

        let processed: Option<(bool,)> = sqlx::query_as(
            "SELECT processed FROM webhook_events WHERE gateway_id = $1 AND event_id = $2",
        )
        .bind(&event.gateway_id)
        .bind(&event.event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to read webhook event", e))?;

        Ok(match processed {
            Some((true,)) => ClaimResult::AlreadyProcessed,
            _ => ClaimResult::InFlight,
        })
    }

    async fn mark_processed(
        &self,
        gateway_id: &str,
        event_id: &str,
        note: Option<&str>,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events SET
                processed = TRUE,
                processed_at = $3,
                claimed_at = NULL,
                last_error = $4
            WHERE gateway_id = $1 AND event_id = $2
            "#,
        )
        .bind(gateway_id)
        .bind(event_id)
        .bind(now.as_datetime())
        .bind(note)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to mark webhook event processed", e))?;
        if result.rows_affected() == 0 {
            return Err(not_found());
        }
        Ok(())
    }

    async fn release(
        &self,
        gateway_id: &str,
        event_id: &str,
        error: &str,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events SET claimed_at = NULL, last_error = $3
            WHERE gateway_id = $1 AND event_id = $2
            "#,
        )
        .bind(gateway_id)
        .bind(event_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to release webhook event", e))?;
        if result.rows_affected() == 0 {
            return Err(not_found());
        }
        Ok(())
    }

    async fn find(
        &self,
        gateway_id: &str,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>, DomainError> {
        let row: Option<WebhookEventRow> = sqlx::query_as(
            r#"
            SELECT gateway_id, event_id, event_type, subscription_id, order_id, payload,
                   processed, claimed_at, last_error, created_at, processed_at
            FROM webhook_events
            WHERE gateway_id = $1 AND event_id = $2
            "#,
        )
        .bind(gateway_id)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load webhook event", e))?;
        Ok(row.map(WebhookEvent::from))
    }

    async fn purge_processed_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM webhook_events WHERE processed AND created_at < $1")
            .bind(cutoff.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to purge webhook events", e))?;
        Ok(result.rows_affected())
    }
}
