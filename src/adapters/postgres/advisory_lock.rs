//! Cross-process subscription lock on PostgreSQL advisory locks.
//!
//! The lock is transaction-scoped: the guard owns an open transaction on a
//! pooled connection and the lock goes away when that transaction ends,
//! including when the guard is dropped mid-flight.
//!
//! Waiters never block inside PostgreSQL: `acquire` polls
//! `pg_try_advisory_xact_lock` and returns the connection to the pool
//! between polls. Only holders keep a connection.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId};
use crate::ports::{SubscriptionLock, SubscriptionLockGuard};

use super::common::db_error;

const FIRST_POLL: Duration = Duration::from_millis(25);
const MAX_POLL: Duration = Duration::from_millis(500);

/// Upper bound on how long `acquire` waits for a busy subscription.
const WAIT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PostgresAdvisoryLock {
    pool: PgPool,
}

impl PostgresAdvisoryLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Doubling poll interval, capped.
fn next_poll(current: Duration) -> Duration {
    (current * 2).min(MAX_POLL)
}

/// 64-bit advisory key from the first half of the UUID. Collisions only
/// serialize two unrelated subscriptions.
fn lock_key(id: &SubscriptionId) -> i64 {
    let bytes = id.as_uuid().as_bytes();
    let mut high = [0u8; 8];
    high.copy_from_slice(&bytes[..8]);
    i64::from_be_bytes(high)
}

#[async_trait]
impl SubscriptionLock for PostgresAdvisoryLock {
    async fn acquire(&self, id: &SubscriptionId) -> Result<SubscriptionLockGuard, DomainError> {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        let mut poll = FIRST_POLL;
        loop {
            if let Some(guard) = self.try_acquire(id).await? {
                return Ok(guard);
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(subscription_id = %id, "Timed out waiting for subscription lock");
                return Err(DomainError::new(
                    ErrorCode::ConcurrentModification,
                    format!("Subscription {} is busy, lock wait timed out", id),
                ));
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
            poll = next_poll(poll);
        }
    }

    async fn try_acquire(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<SubscriptionLockGuard>, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin lock transaction", e))?;
        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_xact_lock($1)")
            .bind(lock_key(id))
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to try advisory lock", e))?;
        Ok(acquired.then(|| SubscriptionLockGuard::new(tx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn lock_key_is_stable_per_subscription() {
        let uuid = Uuid::parse_str("0123456789abcdef0123456789abcdef").unwrap();
        let id = SubscriptionId::from_uuid(uuid);
        assert_eq!(lock_key(&id), 0x0123_4567_89ab_cdef);
        assert_eq!(lock_key(&id), lock_key(&SubscriptionId::from_uuid(uuid)));
    }

    #[test]
    fn poll_interval_doubles_up_to_cap() {
        let mut poll = FIRST_POLL;
        let mut seen = vec![poll];
        for _ in 0..6 {
            poll = next_poll(poll);
            seen.push(poll);
        }
        assert_eq!(seen[1], Duration::from_millis(50));
        assert_eq!(seen[4], Duration::from_millis(400));
        assert_eq!(seen[5], MAX_POLL);
        assert_eq!(seen[6], MAX_POLL);
    }
}
