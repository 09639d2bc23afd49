//! Monetary amounts.
//!
//! Amounts are held in minor units (cents) as `i64`, never as floats.
//! The currency is the ISO 4217 code inherited from the originating order.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ValidationError;

/// Amount in minor units plus currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount_minor: i64,
    currency: String,
}

impl Money {
    /// Creates an amount from minor units.
    pub fn from_minor(amount_minor: i64, currency: &str) -> Result<Self, ValidationError> {
        if amount_minor < 0 {
            return Err(ValidationError::out_of_range(
                "amount",
                0,
                i64::MAX,
                amount_minor,
            ));
        }
        Ok(Self {
            amount_minor,
            currency: normalize_currency(currency)?,
        })
    }

    /// Parses a decimal amount with at most two fractional digits ("19.99").
    pub fn parse(amount: &str, currency: &str) -> Result<Self, ValidationError> {
        let amount = amount.trim();
        let invalid = || {
            ValidationError::invalid_format(
                "amount",
                format!("'{}' is not a decimal amount", amount),
            )
        };

        let (whole, frac) = match amount.split_once('.') {
            Some((w, f)) => (w, f),
            None => (amount, ""),
        };
        if whole.is_empty() || frac.len() > 2 || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        let minor = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(invalid)?;

        Self::from_minor(minor, currency)
    }

    pub fn zero(currency: &str) -> Result<Self, ValidationError> {
        Self::from_minor(0, currency)
    }

    pub fn amount_minor(&self) -> i64 {
        self.amount_minor
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount_minor == 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02} {}",
            self.amount_minor / 100,
            self.amount_minor % 100,
            self.currency
        )
    }
}

fn normalize_currency(code: &str) -> Result<String, ValidationError> {
    let code = code.trim();
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(ValidationError::invalid_format(
            "currency",
            format!("'{}' is not a three-letter currency code", code),
        ));
    }
    Ok(code.to_ascii_uppercase())
}
