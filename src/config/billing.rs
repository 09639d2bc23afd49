//! Billing engine configuration: scheduler cadence, retry backoff, grace.

use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

use crate::application::{
    BillingSettings, RetrySettings, SchedulerSettings, TaskRunnerSettings,
};
use crate::domain::billing::RetryPolicy;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Catch-up tick period of the in-process scheduler
    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval_secs: u64,

    /// Poll period of the retry and grace-deadline runner
    #[serde(default = "default_retry_poll_interval")]
    pub retry_poll_interval_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Subscriptions processed concurrently within one tick
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_intervals")]
    pub retry_intervals_days: Vec<u32>,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// 0 disables the grace window
    #[serde(default)]
    pub grace_days: u32,

    #[serde(default = "default_claim_lease")]
    pub webhook_claim_lease_secs: u64,

    #[serde(default = "default_retention_days")]
    pub webhook_retention_days: u32,

    /// Shared secret for `POST /scheduler/tick`; the endpoint is open when unset
    pub scheduler_token: Option<SecretString>,

    /// Runs the scheduler and task runner loops in this process
    #[serde(default = "default_true")]
    pub run_background_jobs: bool,
}

impl BillingConfig {
    pub fn retry_policy(&self) -> Result<RetryPolicy, ValidationError> {
        RetryPolicy::new(
            self.max_attempts,
            self.retry_intervals_days.clone(),
            self.backoff_multiplier,
        )
        .map_err(|e| ValidationError::InvalidRetryPolicy(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.scheduler_interval_secs == 0 {
            return Err(ValidationError::MustBePositive("billing.scheduler_interval_secs"));
        }
        if self.retry_poll_interval_secs == 0 {
            return Err(ValidationError::MustBePositive("billing.retry_poll_interval_secs"));
        }
        if self.batch_size == 0 {
            return Err(ValidationError::MustBePositive("billing.batch_size"));
        }
        if self.concurrency == 0 {
            return Err(ValidationError::MustBePositive("billing.concurrency"));
        }
        if self.webhook_claim_lease_secs == 0 {
            return Err(ValidationError::MustBePositive("billing.webhook_claim_lease_secs"));
        }
        self.retry_policy()?;
        Ok(())
    }

    /// Service settings for these values and the gateway charge timeout.
    pub fn settings(&self, charge_timeout: Duration) -> Result<BillingSettings, ValidationError> {
        Ok(BillingSettings {
            scheduler: SchedulerSettings {
                batch_size: self.batch_size,
                concurrency: self.concurrency,
                tick_interval: Duration::from_secs(self.scheduler_interval_secs),
            },
            retry: RetrySettings {
                policy: self.retry_policy()?,
                charge_timeout,
                batch_size: self.batch_size,
                concurrency: self.concurrency,
            },
            tasks: TaskRunnerSettings {
                poll_interval: Duration::from_secs(self.retry_poll_interval_secs),
                batch_size: self.batch_size,
                webhook_retention_days: self.webhook_retention_days,
            },
            grace_days: self.grace_days,
            webhook_claim_lease: chrono::Duration::seconds(self.webhook_claim_lease_secs as i64),
        })
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            scheduler_interval_secs: default_scheduler_interval(),
            retry_poll_interval_secs: default_retry_poll_interval(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            retry_intervals_days: default_retry_intervals(),
            backoff_multiplier: default_backoff_multiplier(),
            grace_days: 0,
            webhook_claim_lease_secs: default_claim_lease(),
            webhook_retention_days: default_retention_days(),
            scheduler_token: None,
            run_background_jobs: true,
        }
    }
}

fn default_scheduler_interval() -> u64 {
    3600
}

fn default_retry_poll_interval() -> u64 {
    300
}

fn default_batch_size() -> u32 {
    100
}

fn default_concurrency() -> usize {
    8
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_intervals() -> Vec<u32> {
    vec![1, 3, 7]
}

fn default_backoff_multiplier() -> f64 {
    1.5
}

fn default_claim_lease() -> u64 {
    300
}

fn default_retention_days() -> u32 {
    90
}

fn default_true() -> bool {
    true
}
