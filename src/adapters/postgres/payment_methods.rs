//! PostgreSQL implementation of PaymentMethodStore.
//!
//! The single-default rule is backed by a partial unique index; saving a
//! new default clears the old one in the same transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::PaymentMethod;
use crate::domain::foundation::{DomainError, PaymentMethodId, SubscriptionId};
use crate::ports::PaymentMethodStore;

use super::common::{db_error, ts};

pub struct PostgresPaymentMethodStore {
    pool: PgPool,
}

impl PostgresPaymentMethodStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentMethodRow {
    id: Uuid,
    subscription_id: Uuid,
    gateway_id: String,
    encrypted_token: String,
    customer_id: Option<String>,
    gateway_customer_id: Option<String>,
    is_default: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PaymentMethodRow> for PaymentMethod {
    fn from(row: PaymentMethodRow) -> Self {
        PaymentMethod {
            id: PaymentMethodId::from_uuid(row.id),
            subscription_id: SubscriptionId::from_uuid(row.subscription_id),
            gateway_id: row.gateway_id,
            encrypted_token: row.encrypted_token,
            customer_id: row.customer_id,
            gateway_customer_id: row.gateway_customer_id,
            is_default: row.is_default,
            created_at: ts(row.created_at),
            updated_at: ts(row.updated_at),
        }
    }
}

const COLUMNS: &str = "id, subscription_id, gateway_id, encrypted_token, customer_id, \
                       gateway_customer_id, is_default, created_at, updated_at";

#[async_trait]
impl PaymentMethodStore for PostgresPaymentMethodStore {
    async fn save(&self, method: &PaymentMethod) -> Result<(), DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        if method.is_default {
            sqlx::query(
                r#"
                UPDATE payment_methods SET is_default = FALSE, updated_at = $3
                WHERE subscription_id = $1 AND gateway_id <> $2 AND is_default
                "#,
            )
            .bind(method.subscription_id.as_uuid())
            .bind(&method.gateway_id)
            .bind(method.updated_at.as_datetime())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to clear previous default", e))?;
        }

        sqlx::query(
            r#"
            INSERT INTO payment_methods (
                id, subscription_id, gateway_id, encrypted_token, customer_id,
                gateway_customer_id, is_default, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (subscription_id, gateway_id) DO UPDATE SET
                encrypted_token = EXCLUDED.encrypted_token,
                customer_id = EXCLUDED.customer_id,
                gateway_customer_id = EXCLUDED.gateway_customer_id,
                is_default = EXCLUDED.is_default,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(method.id.as_uuid())
        .bind(method.subscription_id.as_uuid())
        .bind(&method.gateway_id)
        .bind(&method.encrypted_token)
        .bind(&method.customer_id)
        .bind(&method.gateway_customer_id)
        .bind(method.is_default)
        .bind(method.created_at.as_datetime())
        .bind(method.updated_at.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to save payment method", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit payment method", e))?;
        Ok(())
    }

    async fn find(
        &self,
        subscription_id: &SubscriptionId,
        gateway_id: &str,
    ) -> Result<Option<PaymentMethod>, DomainError> {
        let query = format!(
            "SELECT {} FROM payment_methods WHERE subscription_id = $1 AND gateway_id = $2",
            COLUMNS
        );
        let row: Option<PaymentMethodRow> = sqlx::query_as(&query)
            .bind(subscription_id.as_uuid())
            .bind(gateway_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load payment method", e))?;
        Ok(row.map(PaymentMethod::from))
    }

    async fn find_default(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<PaymentMethod>, DomainError> {
        let query = format!(
            "SELECT {} FROM payment_methods WHERE subscription_id = $1 AND is_default",
            COLUMNS
        );
        let row: Option<PaymentMethodRow> = sqlx::query_as(&query)
            .bind(subscription_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load default payment method", e))?;
        Ok(row.map(PaymentMethod::from))
    }

    async fn list(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<PaymentMethod>, DomainError> {
        let query = format!(
            "SELECT {} FROM payment_methods WHERE subscription_id = $1 ORDER BY created_at",
            COLUMNS
        );
        let rows: Vec<PaymentMethodRow> = sqlx::query_as(&query)
            .bind(subscription_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list payment methods", e))?;
        Ok(rows.into_iter().map(PaymentMethod::from).collect())
    }

    async fn delete(
        &self,
        subscription_id: &SubscriptionId,
        gateway_id: &str,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            "DELETE FROM payment_methods WHERE subscription_id = $1 AND gateway_id = $2",
        )
        .bind(subscription_id.as_uuid())
        .bind(gateway_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to delete payment method", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self, subscription_id: &SubscriptionId) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM payment_methods WHERE subscription_id = $1")
            .bind(subscription_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to purge payment methods", e))?;
        Ok(result.rows_affected())
    }
}
