//! PostgreSQL implementation of SubscriptionLedger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{
    DomainError, ErrorCode, Money, OrderId, OrderItemId, OwnerId, SubscriptionId, Timestamp,
};
use crate::domain::subscription::{
    ActivityType, BillingPeriod, OrderRelation, OrderStatus, RelationType, RenewalOrder,
    Subscription, SubscriptionNote, SubscriptionStatus,
};
use crate::ports::{DueSubscription, SubscriptionLedger};

use super::common::{corrupt, db_error, is_unique_violation, to_i32, to_u32, ts};

const SINGLE_NEW_RELATION: &str = "subscription_order_relations_single_new";

pub struct PostgresSubscriptionLedger {
    pool: PgPool,
}

impl PostgresSubscriptionLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    owner_id: Uuid,
    status: String,
    interval_count: i32,
    interval_unit: String,
    trial_interval_count: Option<i32>,
    trial_interval_unit: Option<String>,
    currency: String,
    price_minor: i64,
    signup_fee_minor: i64,
    start_date: DateTime<Utc>,
    next_date: Option<DateTime<Utc>>,
    max_payments: i32,
    payments_made: i32,
    auto_renew: bool,
    user_cancel_allowed: bool,
    grace_period_end: Option<DateTime<Utc>>,
    suspended_reason: Option<String>,
    max_retry_attempts: Option<i32>,
    trashed_from: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

fn period(count: i32, unit: &str) -> Result<BillingPeriod, DomainError> {
    let unit = unit.parse().map_err(|e| corrupt("interval_unit", e))?;
    BillingPeriod::new(to_u32("interval_count", count)?, unit)
        .map_err(|e| corrupt("interval_count", e))
}

fn status(value: &str) -> Result<SubscriptionStatus, DomainError> {
    value.parse().map_err(|e| corrupt("status", e))
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let trial = match (row.trial_interval_count, row.trial_interval_unit.as_deref()) {
            (Some(count), Some(unit)) => Some(period(count, unit)?),
            _ => None,
        };
        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            owner_id: OwnerId::from_uuid(row.owner_id),
            status: status(&row.status)?,
            schedule: period(row.interval_count, &row.interval_unit)?,
            trial,
            price: Money::from_minor(row.price_minor, &row.currency)
                .map_err(|e| corrupt("price", e))?,
            signup_fee: Money::from_minor(row.signup_fee_minor, &row.currency)
                .map_err(|e| corrupt("signup_fee", e))?,
            start_date: ts(row.start_date),
            next_date: row.next_date.map(ts),
            max_payments: to_u32("max_payments", row.max_payments)?,
            payments_made: to_u32("payments_made", row.payments_made)?,
            auto_renew: row.auto_renew,
            user_cancel_allowed: row.user_cancel_allowed,
            grace_period_end: row.grace_period_end.map(ts),
            suspended_reason: row.suspended_reason,
            max_retry_attempts: row
                .max_retry_attempts
                .map(|v| to_u32("max_retry_attempts", v))
                .transpose()?,
            trashed_from: row.trashed_from.as_deref().map(status).transpose()?,
            created_at: ts(row.created_at),
            updated_at: ts(row.updated_at),
            version: row.version,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RelationRow {
    subscription_id: Uuid,
    order_id: Uuid,
    order_item_id: Uuid,
    relation_type: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<RelationRow> for OrderRelation {
    type Error = DomainError;

    fn try_from(row: RelationRow) -> Result<Self, Self::Error> {
        Ok(OrderRelation {
            subscription_id: SubscriptionId::from_uuid(row.subscription_id),
            order_id: OrderId::from_uuid(row.order_id),
            order_item_id: OrderItemId::from_uuid(row.order_item_id),
            relation_type: row
                .relation_type
                .parse::<RelationType>()
                .map_err(|e| corrupt("relation_type", e))?,
            created_at: ts(row.created_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    item_id: Uuid,
    subscription_id: Uuid,
    currency: String,
    amount_minor: i64,
    status: String,
    gateway_id: Option<String>,
    transaction_id: Option<String>,
    attempt_number: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrderRow> for RenewalOrder {
    type Error = DomainError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(RenewalOrder {
            id: OrderId::from_uuid(row.id),
            item_id: OrderItemId::from_uuid(row.item_id),
            subscription_id: SubscriptionId::from_uuid(row.subscription_id),
            amount: Money::from_minor(row.amount_minor, &row.currency)
                .map_err(|e| corrupt("amount", e))?,
            status: row
                .status
                .parse::<OrderStatus>()
                .map_err(|e| corrupt("order status", e))?,
            gateway_id: row.gateway_id,
            transaction_id: row.transaction_id,
            attempt_number: to_u32("attempt_number", row.attempt_number)?,
            last_error: row.last_error,
            created_at: ts(row.created_at),
            paid_at: row.paid_at.map(ts),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NoteRow {
    subscription_id: Uuid,
    activity: String,
    message: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<NoteRow> for SubscriptionNote {
    type Error = DomainError;

    fn try_from(row: NoteRow) -> Result<Self, Self::Error> {
        Ok(SubscriptionNote {
            subscription_id: SubscriptionId::from_uuid(row.subscription_id),
            activity: row
                .activity
                .parse::<ActivityType>()
                .map_err(|e| corrupt("activity", e))?,
            message: row.message,
            created_at: ts(row.created_at),
        })
    }
}

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, owner_id, status, interval_count, interval_unit, trial_interval_count,
    trial_interval_unit, currency, price_minor, signup_fee_minor, start_date, next_date,
    max_payments, payments_made, auto_renew, user_cancel_allowed, grace_period_end,
    suspended_reason, max_retry_attempts, trashed_from, created_at, updated_at, version
"#;

#[async_trait]
impl SubscriptionLedger for PostgresSubscriptionLedger {
    async fn insert(
        &self,
        subscription: &Subscription,
        relation: &OrderRelation,
    ) -> Result<(), DomainError> {
        if relation.relation_type != RelationType::New {
            return Err(DomainError::new(
                ErrorCode::DuplicateOrderRelation,
                "Subscription must be created with its 'new' order relation",
            ));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, owner_id, status, interval_count, interval_unit, trial_interval_count,
                trial_interval_unit, currency, price_minor, signup_fee_minor, start_date, next_date,
                max_payments, payments_made, auto_renew, user_cancel_allowed, grace_period_end,
                suspended_reason, max_retry_attempts, trashed_from, created_at, updated_at, version
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23
            )
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.owner_id.as_uuid())
        .bind(subscription.status.as_str())
        .bind(to_i32("interval_count", subscription.schedule.interval_count)?)
        .bind(subscription.schedule.interval_unit.as_str())
        .bind(
            subscription
                .trial
                .map(|t| to_i32("trial_interval_count", t.interval_count))
                .transpose()?,
        )
        .bind(subscription.trial.map(|t| t.interval_unit.as_str()))
        .bind(subscription.price.currency())
        .bind(subscription.price.amount_minor())
        .bind(subscription.signup_fee.amount_minor())
        .bind(subscription.start_date.as_datetime())
        .bind(subscription.next_date.as_ref().map(Timestamp::as_datetime))
        .bind(to_i32("max_payments", subscription.max_payments)?)
        .bind(to_i32("payments_made", subscription.payments_made)?)
        .bind(subscription.auto_renew)
        .bind(subscription.user_cancel_allowed)
        .bind(subscription.grace_period_end.as_ref().map(Timestamp::as_datetime))
        .bind(&subscription.suspended_reason)
        .bind(
            subscription
                .max_retry_attempts
                .map(|v| to_i32("max_retry_attempts", v))
                .transpose()?,
        )
        .bind(subscription.trashed_from.map(|s| s.as_str()))
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .bind(subscription.version)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to insert subscription", e))?;

        insert_relation(&mut tx, relation).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit subscription insert", e))?;
        Ok(())
    }

    async fn update(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $3,
                interval_count = $4,
                interval_unit = $5,
                trial_interval_count = $6,
                trial_interval_unit = $7,
                price_minor = $8,
                signup_fee_minor = $9,
                next_date = $10,
                max_payments = $11,
                payments_made = $12,
                auto_renew = $13,
                user_cancel_allowed = $14,
                grace_period_end = $15,
                suspended_reason = $16,
                max_retry_attempts = $17,
                trashed_from = $18,
                updated_at = $19,
                version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.version)
        .bind(subscription.status.as_str())
        .bind(to_i32("interval_count", subscription.schedule.interval_count)?)
        .bind(subscription.schedule.interval_unit.as_str())
        .bind(
            subscription
                .trial
                .map(|t| to_i32("trial_interval_count", t.interval_count))
                .transpose()?,
        )
        .bind(subscription.trial.map(|t| t.interval_unit.as_str()))
        .bind(subscription.price.amount_minor())
        .bind(subscription.signup_fee.amount_minor())
        .bind(subscription.next_date.as_ref().map(Timestamp::as_datetime))
        .bind(to_i32("max_payments", subscription.max_payments)?)
        .bind(to_i32("payments_made", subscription.payments_made)?)
        .bind(subscription.auto_renew)
        .bind(subscription.user_cancel_allowed)
        .bind(subscription.grace_period_end.as_ref().map(Timestamp::as_datetime))
        .bind(&subscription.suspended_reason)
        .bind(
            subscription
                .max_retry_attempts
                .map(|v| to_i32("max_retry_attempts", v))
                .transpose()?,
        )
        .bind(subscription.trashed_from.map(|s| s.as_str()))
        .bind(subscription.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update subscription", e))?;

        if result.rows_affected() == 0 {
            // Tell a missing row apart from a stale version.
            let exists: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM subscriptions WHERE id = $1")
                    .bind(subscription.id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| db_error("Failed to check subscription version", e))?;
            return Err(match exists {
                None => DomainError::new(ErrorCode::SubscriptionNotFound, "Subscription not found"),
                Some((found,)) => DomainError::new(
                    ErrorCode::ConcurrentModification,
                    format!(
                        "Subscription {} was modified concurrently (expected version {}, found {})",
                        subscription.id, subscription.version, found
                    ),
                ),
            });
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        let query = format!("SELECT {} FROM subscriptions WHERE id = $1", SUBSCRIPTION_COLUMNS);
        let row: Option<SubscriptionRow> = sqlx::query_as(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load subscription", e))?;
        row.map(Subscription::try_from).transpose()
    }

    async fn find_due(
        &self,
        now: Timestamp,
        after: Option<&DueSubscription>,
        limit: u32,
    ) -> Result<Vec<DueSubscription>, DomainError> {
        let rows: Vec<(DateTime<Utc>, Uuid)> = sqlx::query_as(
            r#"
            SELECT COALESCE(next_date, start_date) AS due_at, id
            FROM subscriptions
            WHERE status IN ('active', 'pe_cancelled')
              AND suspended_reason IS NULL
              AND (
                    next_date <= $1
                 OR (next_date IS NULL AND trial_interval_count IS NULL AND start_date <= $1)
              )
              AND ($2::timestamptz IS NULL OR (COALESCE(next_date, start_date), id) > ($2, $3))
            ORDER BY COALESCE(next_date, start_date), id
            LIMIT $4
            "#,
        )
        .bind(now.as_datetime())
        .bind(after.map(|c| *c.due_at.as_datetime()))
        .bind(after.map(|c| *c.id.as_uuid()))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to query due subscriptions", e))?;

        Ok(rows
            .into_iter()
            .map(|(due_at, id)| DueSubscription {
                due_at: ts(due_at),
                id: SubscriptionId::from_uuid(id),
            })
            .collect())
    }

    async fn delete(&self, id: &SubscriptionId) -> Result<(), DomainError> {
        // Notes, orders and relations cascade.
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to delete subscription", e))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::new(ErrorCode::SubscriptionNotFound, "Subscription not found"));
        }
        Ok(())
    }

    async fn append_relation(&self, relation: &OrderRelation) -> Result<(), DomainError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| db_error("Failed to acquire connection", e))?;
        insert_relation(&mut conn, relation).await
    }

    async fn relations_for(&self, id: &SubscriptionId) -> Result<Vec<OrderRelation>, DomainError> {
        let rows: Vec<RelationRow> = sqlx::query_as(
            r#"
            SELECT subscription_id, order_id, order_item_id, relation_type, created_at
            FROM subscription_order_relations
            WHERE subscription_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load order relations", e))?;
        rows.into_iter().map(OrderRelation::try_from).collect()
    }

    async fn detach_order(&self, order_id: &OrderId) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM subscription_order_relations WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to detach order", e))?;
        Ok(result.rows_affected())
    }

    async fn save_order(&self, order: &RenewalOrder) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO renewal_orders (
                id, item_id, subscription_id, currency, amount_minor, status, gateway_id,
                transaction_id, attempt_number, last_error, created_at, paid_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                gateway_id = EXCLUDED.gateway_id,
                transaction_id = EXCLUDED.transaction_id,
                attempt_number = EXCLUDED.attempt_number,
                last_error = EXCLUDED.last_error,
                paid_at = EXCLUDED.paid_at
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.item_id.as_uuid())
        .bind(order.subscription_id.as_uuid())
        .bind(order.amount.currency())
        .bind(order.amount.amount_minor())
        .bind(order.status.as_str())
        .bind(&order.gateway_id)
        .bind(&order.transaction_id)
        .bind(to_i32("attempt_number", order.attempt_number)?)
        .bind(&order.last_error)
        .bind(order.created_at.as_datetime())
        .bind(order.paid_at.as_ref().map(Timestamp::as_datetime))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to save renewal order", e))?;
        Ok(())
    }

    async fn find_order(&self, id: &OrderId) -> Result<Option<RenewalOrder>, DomainError> {
        let row: Option<OrderRow> = sqlx::query_as(
            r#"
            SELECT id, item_id, subscription_id, currency, amount_minor, status, gateway_id,
                   transaction_id, attempt_number, last_error, created_at, paid_at
            FROM renewal_orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load renewal order", e))?;
        row.map(RenewalOrder::try_from).transpose()
    }

    async fn find_order_by_transaction(
        &self,
        gateway_id: &str,
        transaction_id: &str,
    ) -> Result<Option<RenewalOrder>, DomainError> {
        let row: Option<OrderRow> = sqlx::query_as(
            r#"
            SELECT id, item_id, subscription_id, currency, amount_minor, status, gateway_id,
                   transaction_id, attempt_number, last_error, created_at, paid_at
            FROM renewal_orders
            WHERE gateway_id = $1 AND transaction_id = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(gateway_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to look up order by transaction", e))?;
        row.map(RenewalOrder::try_from).transpose()
    }

    async fn append_note(&self, note: &SubscriptionNote) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO subscription_notes (subscription_id, activity, message, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(note.subscription_id.as_uuid())
        .bind(note.activity.as_str())
        .bind(&note.message)
        .bind(note.created_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to append note", e))?;
        Ok(())
    }

    async fn notes_for(&self, id: &SubscriptionId) -> Result<Vec<SubscriptionNote>, DomainError> {
        let rows: Vec<NoteRow> = sqlx::query_as(
            r#"
            SELECT subscription_id, activity, message, created_at
            FROM subscription_notes
            WHERE subscription_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load notes", e))?;
        rows.into_iter().map(SubscriptionNote::try_from).collect()
    }
}

async fn insert_relation(
    conn: &mut sqlx::PgConnection,
    relation: &OrderRelation,
) -> Result<(), DomainError> {
    sqlx::query(
        r#"
        INSERT INTO subscription_order_relations (
            subscription_id, order_id, order_item_id, relation_type, created_at
        ) VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(relation.subscription_id.as_uuid())
    .bind(relation.order_id.as_uuid())
    .bind(relation.order_item_id.as_uuid())
    .bind(relation.relation_type.as_str())
    .bind(relation.created_at.as_datetime())
    .execute(conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e, SINGLE_NEW_RELATION) {
            DomainError::new(
                ErrorCode::DuplicateOrderRelation,
                "Subscription already has a 'new' order relation",
            )
        } else {
            db_error("Failed to insert order relation", e)
        }
    })?;
    Ok(())
}
