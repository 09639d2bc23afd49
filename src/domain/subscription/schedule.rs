//! Billing and trial periods.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{Timestamp, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Day,
    Week,
    Month,
    Year,
}

impl IntervalUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalUnit::Day => "day",
            IntervalUnit::Week => "week",
            IntervalUnit::Month => "month",
            IntervalUnit::Year => "year",
        }
    }
}

impl FromStr for IntervalUnit {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(IntervalUnit::Day),
            "week" => Ok(IntervalUnit::Week),
            "month" => Ok(IntervalUnit::Month),
            "year" => Ok(IntervalUnit::Year),
            other => Err(ValidationError::invalid_format(
                "interval_unit",
                format!("unknown unit '{}'", other),
            )),
        }
    }
}

/// A recurring period: "every N units". Used for both the billing
/// schedule and the optional trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub interval_count: u32,
    pub interval_unit: IntervalUnit,
}

impl BillingPeriod {
    pub const MAX_INTERVAL_COUNT: u32 = 365;

    pub fn new(interval_count: u32, interval_unit: IntervalUnit) -> Result<Self, ValidationError> {
        if interval_count == 0 || interval_count > Self::MAX_INTERVAL_COUNT {
            return Err(ValidationError::out_of_range(
                "interval_count",
                1,
                Self::MAX_INTERVAL_COUNT as i64,
                interval_count as i64,
            ));
        }
        Ok(Self {
            interval_count,
            interval_unit,
        })
    }

    pub fn monthly() -> Self {
        Self {
            interval_count: 1,
            interval_unit: IntervalUnit::Month,
        }
    }

    /// Returns `from` advanced by one period.
    pub fn advance(&self, from: Timestamp) -> Timestamp {
        let n = self.interval_count;
        match self.interval_unit {
            IntervalUnit::Day => from.add_days(n as i64),
            IntervalUnit::Week => from.add_days(n as i64 * 7),
            IntervalUnit::Month => from.add_months(n),
            IntervalUnit::Year => from.add_months(n * 12),
        }
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "every {} {}", self.interval_count, self.interval_unit.as_str())
    }
}
