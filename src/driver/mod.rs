//! The scheduler tick and the operations exposed around it.
//!
//! A tick takes the single-flight lock, selects one unit of work (retry
//! queue first, then the batch cursor), runs it through the pipeline,
//! records the outcome against a fresh copy of the queue and re-arms the
//! trigger while work remains. Everything it needs is handed in as a
//! collaborator so tests can run ticks without a timer or a network.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::artifacts::{ArtifactId, ArtifactStore};
use crate::config::{BatchSettings, MaintenanceConfig, QagenConfig, SchedulerConfig};
use crate::content::{ContentSource, ItemId};
use crate::error::{ProcessingError, QagenError};
use crate::llm::ChatBackend;
use crate::lock::{LockAttempt, ProcessingLock};
use crate::pipeline::{Pipeline, Processed};
use crate::queue::{
    Admission, Batch, BatchId, BatchStatus, BatchSummary, QueueStats, Requeue, WorkSlot,
};
use crate::reaper::{ReapReport, reap_orphans};
use crate::state_machine::{FailedItem, ItemEvent, ItemMachine, ItemStatus};
use crate::store::StateStore;
use crate::trigger::Trigger;


/// What a tick did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TickReport {
    /// Another tick holds the lock.
    Skipped { lock_expires_at: DateTime<Utc> },
    /// No pending batch has work.
    Idle,
    Processed {
        batch_id: BatchId,
        item_id: ItemId,
        outcome: ItemOutcome,
        rescheduled: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Completed { artifacts: usize, cached: bool },
    /// The item was completed before its turn came.
    AlreadyCompleted,
    Failed { error: String },
}

impl ItemOutcome {
    fn succeeded(&self) -> bool {
        !matches!(self, ItemOutcome::Failed { .. })
    }
}

/// A batch with its computed progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSnapshot {
    #[serde(flatten)]
    pub batch: Batch,
    pub progress_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BatchStatusView {
    One(Box<BatchSnapshot>),
    All(Vec<BatchSummary>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub item_id: ItemId,
    pub status: ItemStatus,
    pub fail_count: u32,
    pub last_error: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
    pub batch_id: Option<BatchId>,
    pub in_queue: bool,
    pub artifact_ids: Vec<ArtifactId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryResult {
    pub success: bool,
    pub message: String,
    pub batch_id: Option<BatchId>,
}

impl RetryResult {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            batch_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessorStatus {
    pub locked: bool,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub has_pending_work: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub purged_batches: Vec<BatchId>,
    pub reaped: ReapReport,
}

/// Everything the driver talks to.
pub struct Collaborators<B> {
    pub store: Arc<dyn StateStore>,
    pub trigger: Arc<dyn Trigger>,
    pub content: Arc<dyn ContentSource>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub pipeline: Pipeline<B>,
}

pub struct Driver<B> {
    store: Arc<dyn StateStore>,
    trigger: Arc<dyn Trigger>,
    content: Arc<dyn ContentSource>,
    artifacts: Arc<dyn ArtifactStore>,
    pipeline: Pipeline<B>,
    lock: ProcessingLock,
    scheduler: SchedulerConfig,
    maintenance: MaintenanceConfig,
    defaults: BatchSettings,
    // Orders snapshot read-modify-write between tasks of this process; the
    // store's snapshot lock orders it between processes.
    critical: Mutex<()>,
}

fn secs(n: u64) -> Duration {
    i64::try_from(n)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

fn days(n: u64) -> Duration {
    i64::try_from(n)
        .ok()
        .and_then(Duration::try_days)
        .unwrap_or(Duration::MAX)
}

fn before(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl<B: ChatBackend> Driver<B> {
    pub fn new(parts: Collaborators<B>, config: &QagenConfig) -> Self {
        let lock = ProcessingLock::new(
            Arc::clone(&parts.store),
            secs(config.scheduler.lock_horizon_secs),
        );
        Self {
            store: parts.store,
            trigger: parts.trigger,
            content: parts.content,
            artifacts: parts.artifacts,
            pipeline: parts.pipeline,
            lock,
            scheduler: config.scheduler.clone(),
            maintenance: config.maintenance.clone(),
            defaults: config.settings.clone(),
            critical: Mutex::new(()),
        }
    }

    pub fn pipeline(&self) -> &Pipeline<B> {
        &self.pipeline
    }

    pub fn trigger(&self) -> &dyn Trigger {
        self.trigger.as_ref()
    }

    /// Advances at most one work item.
    ///
    /// Per-item failures are booked, not returned. An `Err` means the
    /// bookkeeping itself failed; the lock is released and a reschedule is
    /// still attempted in that case.
    pub async fn tick(&self) -> Result<TickReport, QagenError> {
        let now = Utc::now();
        let guard = match self.lock.acquire(now)? {
            LockAttempt::Acquired(guard) => guard,
            LockAttempt::Contended { expires_at } => {
                debug!(%expires_at, "tick skipped, another tick holds the lock");
                return Ok(TickReport::Skipped {
                    lock_expires_at: expires_at,
                });
            }
        };
        self.store
            .update_marks(&mut |marks| marks.last_tick_at = Some(now))?;

        let result = self.advance_one().await;
        if let Err(e) = &result {
            error!(error = %e, "tick aborted");
        }

        let rescheduled = match self.reschedule() {
            Ok(armed) => armed,
            Err(e) => {
                warn!(error = %e, "failed to reschedule processing");
                false
            }
        };
        if let Err(e) = guard.release() {
            warn!(error = %e, "failed to release processing lock; it will expire on its own");
        }

        Ok(match result? {
            None => TickReport::Idle,
            Some((batch_id, item_id, outcome)) => TickReport::Processed {
                batch_id,
                item_id,
                outcome,
                rescheduled,
            },
        })
    }

    async fn advance_one(&self) -> Result<Option<(BatchId, ItemId, ItemOutcome)>, QagenError> {
        let Some((batch_id, slot, settings)) = self.select()? else {
            debug!("no pending work");
            return Ok(None);
        };
        let item_id = slot.item_id();

        let outcome = if self.begin(item_id)? {
            info!(%batch_id, item_id, "processing item");
            let result = self.pipeline.process(item_id, &settings).await;
            self.finish(item_id, &result)?;
            match result {
                Ok(done) => ItemOutcome::Completed {
                    artifacts: done.artifact_ids.len(),
                    cached: done.cached,
                },
                Err(e) => {
                    error!(%batch_id, item_id, error = %e, "item failed");
                    ItemOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            }
        } else {
            info!(%batch_id, item_id, "item already completed, skipping");
            ItemOutcome::AlreadyCompleted
        };

        self.record(&batch_id, slot, outcome.succeeded())?;
        Ok(Some((batch_id, item_id, outcome)))
    }

    fn select(&self) -> Result<Option<(BatchId, WorkSlot, BatchSettings)>, QagenError> {
        let _critical = self.critical.lock();
        let queue = self.store.load_queue()?;
        Ok(queue
            .next_work()
            .map(|(batch, slot)| (batch.id.clone(), slot, batch.settings.clone())))
    }

    /// Marks the item `processing`. Returns `false` if it is already completed.
    fn begin(&self, item_id: ItemId) -> Result<bool, QagenError> {
        let _critical = self.critical.lock();
        let _snapshots = self.store.lock_snapshots()?;
        let mut items = self.store.load_items()?;
        if ItemMachine::apply(items.entry(item_id), ItemEvent::Begin, Utc::now()).is_err() {
            return Ok(false);
        }
        self.store.save_items(&items)?;
        Ok(true)
    }

    fn finish(
        &self,
        item_id: ItemId,
        result: &Result<Processed, ProcessingError>,
    ) -> Result<(), QagenError> {
        let _critical = self.critical.lock();
        let _snapshots = self.store.lock_snapshots()?;
        let mut items = self.store.load_items()?;
        let event = match result {
            Ok(done) => ItemEvent::Succeed {
                artifact_ids: done.artifact_ids.clone(),
            },
            Err(e) => ItemEvent::Fail {
                message: e.to_string(),
            },
        };
        if let Err(e) = ItemMachine::apply(items.entry(item_id), event, Utc::now()) {
            warn!(item_id, error = %e, "item state changed while processing");
        }
        self.store.save_items(&items)?;
        Ok(())
    }

    fn record(&self, batch_id: &str, slot: WorkSlot, succeeded: bool) -> Result<(), QagenError> {
        let _critical = self.critical.lock();
        let _snapshots = self.store.lock_snapshots()?;
        let mut queue = self.store.load_queue()?;
        match queue.batch_mut(batch_id) {
            Some(batch) => {
                batch.record(slot, succeeded, Utc::now());
                if batch.status == BatchStatus::Completed {
                    info!(
                        batch_id,
                        processed = batch.processed_count,
                        failed = batch.failed_count,
                        "batch completed"
                    );
                }
            }
            None => {
                warn!(batch_id, "batch disappeared while its item was processed");
                return Ok(());
            }
        }
        self.store.save_queue(&queue)?;
        Ok(())
    }

    /// Whether `id` exists and passes the source type and term filter.
    fn admissible(&self, id: ItemId, settings: &BatchSettings) -> bool {
        self.content
            .get(id)
            .is_some_and(|item| settings.admits(&item))
    }

    /// Arms the next tick if work remains and nothing is armed.
    fn reschedule(&self) -> Result<bool, QagenError> {
        if !self.store.load_queue()?.has_pending_work() {
            return Ok(false);
        }
        Ok(self
            .trigger
            .arm_if_idle(secs(self.scheduler.tick_delay_secs), Utc::now())?)
    }

    /// Admits a batch under `settings`, or the configured defaults.
    pub fn admit_batch(
        &self,
        item_ids: &[ItemId],
        settings: Option<BatchSettings>,
    ) -> Result<Admission, QagenError> {
        let settings = settings.unwrap_or_else(|| self.defaults.clone());
        let admission = {
            let _critical = self.critical.lock();
            let _snapshots = self.store.lock_snapshots()?;
            let mut queue = self.store.load_queue()?;
            let mut items = self.store.load_items()?;
            let admission = queue.admit(
                item_ids,
                settings.clone(),
                |id| self.admissible(id, &settings),
                &mut items,
                Utc::now(),
            );
            if !admission.is_noop() {
                self.store.save_items(&items)?;
                self.store.save_queue(&queue)?;
            }
            admission
        };
        if !admission.is_noop() {
            self.trigger
                .arm_if_idle(secs(self.scheduler.watchdog_delay_secs), Utc::now())?;
        }
        Ok(admission)
    }

    /// One batch with progress, or summaries of all batches.
    pub fn get_batch_status(&self, batch_id: Option<&str>) -> Result<BatchStatusView, QagenError> {
        let queue = self.store.load_queue()?;
        match batch_id {
            None => Ok(BatchStatusView::All(queue.summaries())),
            Some(id) => {
                let batch = queue
                    .batch(id)
                    .ok_or_else(|| QagenError::BatchNotFound(id.to_string()))?;
                Ok(BatchStatusView::One(Box::new(BatchSnapshot {
                    progress_percent: batch.progress_percent(),
                    batch: batch.clone(),
                })))
            }
        }
    }

    pub fn queue_stats(&self) -> Result<QueueStats, QagenError> {
        Ok(self.store.load_queue()?.stats())
    }

    pub fn items_in_queue(&self) -> Result<BTreeSet<ItemId>, QagenError> {
        Ok(self.store.load_queue()?.items_in_queue())
    }

    pub fn item_status(&self, item_id: ItemId) -> Result<ItemReport, QagenError> {
        let items = self.store.load_items()?;
        let in_queue = self.store.load_queue()?.is_in_queue(item_id);
        let state = items.get(item_id).cloned().unwrap_or_default();
        Ok(ItemReport {
            item_id,
            status: state.status,
            fail_count: state.fail_count,
            last_error: state.last_error,
            failed_at: state.failed_at,
            batch_id: state.batch_id,
            in_queue,
            artifact_ids: state.artifact_ids,
        })
    }

    /// Sends a failed item back for another attempt.
    ///
    /// The item goes to the retry queue of its originating batch (reopening
    /// it if it had completed). If that batch is gone or cancelled a new
    /// single-item batch is admitted with the configured settings. Items not
    /// in `failed` are rejected without error.
    pub fn retry_failed_item(&self, item_id: ItemId) -> Result<RetryResult, QagenError> {
        let now = Utc::now();
        let result = {
            let _critical = self.critical.lock();
            let _snapshots = self.store.lock_snapshots()?;
            let mut items = self.store.load_items()?;
            let Some(state) = items.get_mut(item_id) else {
                return Ok(RetryResult::rejected(format!(
                    "item {item_id} has never been processed"
                )));
            };
            if let Err(e) = ItemMachine::apply(state, ItemEvent::Retry, now) {
                return Ok(RetryResult::rejected(e.to_string()));
            }
            let origin = state.batch_id.clone();

            let mut queue = self.store.load_queue()?;
            let requeued = origin
                .as_deref()
                .map(|id| queue.requeue(id, item_id))
                .unwrap_or(Requeue::BatchUnavailable);

            let result = match requeued {
                Requeue::Queued | Requeue::AlreadyQueued => RetryResult {
                    success: true,
                    message: format!("item {item_id} queued for retry"),
                    batch_id: origin,
                },
                Requeue::BatchUnavailable => {
                    let admission = queue.admit(
                        &[item_id],
                        self.defaults.clone(),
                        |id| self.admissible(id, &self.defaults),
                        &mut items,
                        now,
                    );
                    match admission.batch_id {
                        Some(batch_id) => RetryResult {
                            success: true,
                            message: format!("item {item_id} queued in new batch {batch_id}"),
                            batch_id: Some(batch_id),
                        },
                        None => {
                            return Ok(RetryResult::rejected(format!(
                                "item {item_id} could not be queued again"
                            )));
                        }
                    }
                }
            };
            self.store.save_items(&items)?;
            self.store.save_queue(&queue)?;
            result
        };

        info!(item_id, batch_id = ?result.batch_id, "failed item queued for retry");
        self.trigger
            .arm_if_idle(secs(self.scheduler.tick_delay_secs), now)?;
        Ok(result)
    }

    /// Clears any armed trigger and arms a near-immediate tick.
    pub fn force_start(&self) -> Result<bool, QagenError> {
        self.trigger.clear_scheduled()?;
        self.trigger
            .schedule_once(secs(self.scheduler.force_delay_secs), Utc::now())?;
        info!("processing force-started");
        Ok(true)
    }

    /// Watchdog: arms a near-immediate tick if work is pending and nothing is
    /// armed. Returns whether it armed.
    pub fn check_and_start(&self) -> Result<bool, QagenError> {
        if !self.store.load_queue()?.has_pending_work() {
            debug!("watchdog: no pending work");
            return Ok(false);
        }
        let armed = self
            .trigger
            .arm_if_idle(secs(self.scheduler.watchdog_delay_secs), Utc::now())?;
        if armed {
            info!("watchdog: pending work found, tick scheduled");
        }
        Ok(armed)
    }

    /// Stops future ticks from serving the batch. An item already in flight
    /// finishes normally.
    pub fn cancel_batch(&self, batch_id: &str) -> Result<bool, QagenError> {
        let _critical = self.critical.lock();
        let _snapshots = self.store.lock_snapshots()?;
        let mut queue = self.store.load_queue()?;
        let cancelled = queue
            .cancel(batch_id, Utc::now())
            .ok_or_else(|| QagenError::BatchNotFound(batch_id.to_string()))?;
        if cancelled {
            self.store.save_queue(&queue)?;
            info!(batch_id, "batch cancelled");
        }
        Ok(cancelled)
    }

    pub fn failed_items(&self, limit: usize) -> Result<Vec<FailedItem>, QagenError> {
        Ok(self.store.load_items()?.failed(limit))
    }

    pub fn processor_status(&self) -> Result<ProcessorStatus, QagenError> {
        let now = Utc::now();
        let lock_expires_at = self.lock.holder(now)?;
        let marks = self.store.marks()?;
        Ok(ProcessorStatus {
            locked: lock_expires_at.is_some(),
            lock_expires_at,
            next_run_at: marks.next_run_at,
            last_tick_at: marks.last_tick_at,
            has_pending_work: self.store.load_queue()?.has_pending_work(),
        })
    }

    /// Deletes stale drafts whose source item no pending batch references.
    pub fn reap_orphans(&self) -> Result<ReapReport, QagenError> {
        let protected = self.store.load_queue()?.active_item_ids();
        let cutoff = before(Utc::now(), secs(self.maintenance.draft_staleness_secs));
        Ok(reap_orphans(self.artifacts.as_ref(), &protected, cutoff))
    }

    /// Removes finished batches past the retention window, then sweeps
    /// orphaned drafts.
    pub fn purge_completed_batches(&self) -> Result<PurgeReport, QagenError> {
        let purged_batches = {
            let _critical = self.critical.lock();
            let _snapshots = self.store.lock_snapshots()?;
            let mut queue = self.store.load_queue()?;
            let cutoff = before(Utc::now(), days(self.maintenance.batch_retention_days));
            let purged = queue.purge_finished(cutoff);
            if !purged.is_empty() {
                self.store.save_queue(&queue)?;
                info!(count = purged.len(), "finished batches purged");
            }
            purged
        };
        let reaped = self.reap_orphans()?;
        Ok(PurgeReport {
            purged_batches,
            reaped,
        })
    }
}
