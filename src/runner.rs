//! Long-running host for the driver.
//!
//! Polls the trigger and fires a tick when it comes due, runs the watchdog
//! and the maintenance jobs on their own cadence, and stops on the shutdown
//! future (ctrl-c in the CLI). A tick in flight always completes before the
//! loop looks at the shutdown signal again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::audit::AuditJournal;
use crate::config::{MaintenanceConfig, SchedulerConfig};
use crate::driver::{Driver, TickReport};
use crate::error::QagenError;
use crate::llm::ChatBackend;
use crate::trigger::saturating_after;

/// What one poll did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub tick: Option<TickReport>,
    pub watchdog_armed: bool,
    pub reaped: Option<usize>,
    pub purged: Option<usize>,
    pub audit_pruned: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Cadence {
    every: Duration,
    next: DateTime<Utc>,
}

impl Cadence {
    fn starting(every_secs: u64, now: DateTime<Utc>) -> Self {
        Self {
            every: Duration::try_seconds(i64::try_from(every_secs).unwrap_or(i64::MAX))
                .unwrap_or(Duration::MAX),
            next: now,
        }
    }

    fn due(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.next {
            return false;
        }
        self.next = saturating_after(now, self.every);
        true
    }
}

pub struct Runner<'a, B> {
    driver: &'a Driver<B>,
    audit: Option<Arc<AuditJournal>>,
    poll_interval: StdDuration,
    audit_retention: Duration,
    watchdog: Cadence,
    reap: Cadence,
    purge: Cadence,
}

impl<'a, B: ChatBackend> Runner<'a, B> {
    pub fn new(
        driver: &'a Driver<B>,
        scheduler: &SchedulerConfig,
        maintenance: &MaintenanceConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            driver,
            audit: None,
            poll_interval: StdDuration::from_millis(scheduler.poll_interval_ms.max(10)),
            audit_retention: Duration::try_days(
                i64::try_from(maintenance.audit_retention_days).unwrap_or(i64::MAX),
            )
            .unwrap_or(Duration::MAX),
            watchdog: Cadence::starting(scheduler.watchdog_interval_secs, now),
            reap: Cadence::starting(maintenance.reap_interval_secs, now),
            purge: Cadence::starting(maintenance.purge_interval_secs, now),
        }
    }

    /// Prunes this journal as part of the purge job.
    pub fn with_audit(mut self, audit: Arc<AuditJournal>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Polls until `shutdown` resolves.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<(), QagenError> {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "runner started");
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("runner received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once(Utc::now()).await {
                        warn!(error = %e, "runner poll failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// One pass: watchdog, maintenance, then a tick if the trigger is due.
    pub async fn poll_once(&mut self, now: DateTime<Utc>) -> Result<PollReport, QagenError> {
        let mut report = PollReport::default();

        if self.watchdog.due(now) {
            report.watchdog_armed = self.driver.check_and_start()?;
        }
        if self.reap.due(now) {
            report.reaped = Some(self.driver.reap_orphans()?.deleted);
        }
        if self.purge.due(now) {
            report.purged = Some(self.driver.purge_completed_batches()?.purged_batches.len());
            if let Some(audit) = &self.audit {
                let cutoff = now
                    .checked_sub_signed(self.audit_retention)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                report.audit_pruned = Some(audit.prune(cutoff)?);
            }
        }

        if self.driver.trigger().take_due(now)? {
            debug!("trigger fired");
            report.tick = Some(self.driver.tick().await?);
        }
        Ok(report)
    }
}
