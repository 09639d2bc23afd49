//! Row conversion helpers shared by the PostgreSQL adapters.

use chrono::{DateTime, Utc};
use std::fmt::Display;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp};

pub(super) fn db_error(context: &str, err: sqlx::Error) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("{}: {}", context, err))
}

/// A stored value that no longer parses into its domain type.
pub(super) fn corrupt(field: &str, err: impl Display) -> DomainError {
    DomainError::new(
        ErrorCode::DatabaseError,
        format!("Invalid stored value for {}: {}", field, err),
    )
}

pub(super) fn ts(dt: DateTime<Utc>) -> Timestamp {
    Timestamp::from_datetime(dt)
}

pub(super) fn to_u32(field: &str, value: i32) -> Result<u32, DomainError> {
    u32::try_from(value).map_err(|e| corrupt(field, e))
}

pub(super) fn to_i32(field: &str, value: u32) -> Result<i32, DomainError> {
    i32::try_from(value).map_err(|e| {
        DomainError::new(ErrorCode::OutOfRange, format!("{} too large to store: {}", field, e))
    })
}

/// True when the error is a unique violation of `constraint`.
pub(super) fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint() == Some(constraint),
        _ => false,
    }
}
