//! RenewalScheduler - periodic scan for subscriptions whose renewal is due.
//!
//! A tick pages through due subscriptions with a keyset cursor and works
//! each one under its lock:
//!
//! | State | Action |
//! |-------|--------|
//! | pending-cancel, not suspended | move to cancelled, no charge |
//! | retry already pending | skip, the retry runner owns it |
//! | grace window elapsed | expire |
//! | otherwise | attempt 1 of a new renewal order |
//!
//! A first attempt that ends in a scheduled retry opens the grace window.
//! Ticks are safe to run more often than needed and to overlap: the due
//! check is repeated under the lock and busy subscriptions are skipped.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use crate::domain::billing::GraceEvaluation;
use crate::domain::foundation::{SubscriptionId, Timestamp};
use crate::domain::subscription::SubscriptionStatus;
use crate::ports::{DueSubscription, RetryStateRepository, SubscriptionLedger};

use super::{AttemptOutcome, BillingError, GracePeriodManager, RetryEngine, SubscriptionLifecycle};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Due subscriptions loaded per page.
    pub batch_size: u32,
    pub concurrency: usize,
    pub tick_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 8,
            tick_interval: Duration::from_secs(3600),
        }
    }
}

/// Counts for one tick; returned by the manual tick endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub scanned: usize,
    pub renewed: usize,
    pub rescheduled: usize,
    pub suspended: usize,
    pub expired: usize,
    pub cancelled: usize,
    pub grace_started: usize,
    pub skipped_locked: usize,
    pub skipped_pending_retry: usize,
    pub errors: usize,
}

enum Renewal {
    Attempted {
        outcome: AttemptOutcome,
        grace_started: bool,
    },
    GraceExpired,
    Cancelled,
    PendingRetry,
    NotDue,
    Busy,
}

pub struct RenewalScheduler {
    lifecycle: Arc<SubscriptionLifecycle>,
    ledger: Arc<dyn SubscriptionLedger>,
    retries: Arc<dyn RetryStateRepository>,
    engine: Arc<RetryEngine>,
    grace: Arc<GracePeriodManager>,
    settings: SchedulerSettings,
}

impl RenewalScheduler {
    pub fn new(
        lifecycle: Arc<SubscriptionLifecycle>,
        ledger: Arc<dyn SubscriptionLedger>,
        retries: Arc<dyn RetryStateRepository>,
        engine: Arc<RetryEngine>,
        grace: Arc<GracePeriodManager>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            lifecycle,
            ledger,
            retries,
            engine,
            grace,
            settings,
        }
    }

    /// Runs ticks on `tick_interval` until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Renewal scheduler stopped");
                        return;
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Timestamp::now()).await {
                        tracing::error!(error = %e, "Renewal tick failed");
                    }
                }
            }
        }
    }

    /// One pass over everything due at `now`.
    pub async fn tick(&self, now: Timestamp) -> Result<TickReport, BillingError> {
        let mut report = TickReport::default();
        let batch_size = self.settings.batch_size.max(1);
        let mut cursor: Option<DueSubscription> = None;

        loop {
            let page = self.ledger.find_due(now, cursor.as_ref(), batch_size).await?;
            let Some(last) = page.last().copied() else {
                break;
            };
            let full_page = page.len() as u32 == batch_size;
            cursor = Some(last);
            report.scanned += page.len();

            let results: Vec<_> = stream::iter(page)
                .map(|due| async move { (due.id, self.renew(due.id, now).await) })
                .buffer_unordered(self.settings.concurrency.max(1))
                .collect()
                .await;

            for (id, result) in results {
                Self::record(&mut report, id, result);
            }
            if !full_page {
                break;
            }
        }

        if report.scanned > 0 {
            tracing::info!(
                scanned = report.scanned,
                renewed = report.renewed,
                rescheduled = report.rescheduled,
                suspended = report.suspended,
                expired = report.expired,
                cancelled = report.cancelled,
                errors = report.errors,
                "Renewal tick finished"
            );
        } else {
            tracing::debug!("Renewal tick found nothing due");
        }
        Ok(report)
    }

    async fn renew(&self, id: SubscriptionId, now: Timestamp) -> Result<Renewal, BillingError> {
        let Some(_guard) = self.lifecycle.try_lock(&id).await? else {
            return Ok(Renewal::Busy);
        };

        let mut subscription = match self.ledger.find_by_id(&id).await? {
            Some(s) if s.is_due(now) => s,
            _ => return Ok(Renewal::NotDue),
        };

        if subscription.status == SubscriptionStatus::PendingCancel {
            self.lifecycle
                .transition(
                    &mut subscription,
                    SubscriptionStatus::Cancelled,
                    "cancelled at end of prepaid term",
                    now,
                )
                .await?;
            return Ok(Renewal::Cancelled);
        }

        if self.retries.find_pending(&id).await?.is_some() {
            return Ok(Renewal::PendingRetry);
        }

        let evaluation = self.grace.evaluate(&subscription, now);
        if evaluation == GraceEvaluation::Elapsed {
            self.grace.expire(&mut subscription, now).await?;
            return Ok(Renewal::GraceExpired);
        }

        let outcome = self
            .engine
            .attempt_renewal(&mut subscription, None, 1, now)
            .await?;

        let mut grace_started = false;
        if let (GraceEvaluation::Start { grace_end }, AttemptOutcome::RetryScheduled { .. }) =
            (evaluation, &outcome)
        {
            self.grace.open(&mut subscription, grace_end, now).await?;
            grace_started = true;
        }

        Ok(Renewal::Attempted {
            outcome,
            grace_started,
        })
    }

    fn record(report: &mut TickReport, id: SubscriptionId, result: Result<Renewal, BillingError>) {
        match result {
            Ok(Renewal::Attempted {
                outcome,
                grace_started,
            }) => {
                if grace_started {
                    report.grace_started += 1;
                }
                match outcome {
                    AttemptOutcome::Paid { .. } | AttemptOutcome::AlreadySettled { .. } => {
                        report.renewed += 1
                    }
                    AttemptOutcome::RetryScheduled { .. } => report.rescheduled += 1,
                    AttemptOutcome::Suspended { .. } => report.suspended += 1,
                    AttemptOutcome::Expired => report.expired += 1,
                }
            }
            Ok(Renewal::GraceExpired) => report.expired += 1,
            Ok(Renewal::Cancelled) => report.cancelled += 1,
            Ok(Renewal::PendingRetry) => report.skipped_pending_retry += 1,
            Ok(Renewal::NotDue) => {}
            Ok(Renewal::Busy) => report.skipped_locked += 1,
            Err(e) => {
                report.errors += 1;
                tracing::error!(subscription_id = %id, error = %e, "Renewal failed");
            }
        }
    }
}
