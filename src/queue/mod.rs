//! The persisted collection of batches.
//!
//! Owns admission filtering and aggregate statistics. Nothing here performs
//! I/O; the driver loads and saves the whole queue around each mutation.

mod batch;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

pub use batch::{Batch, BatchId, BatchStatus, WorkSlot};

use crate::config::BatchSettings;
use crate::content::ItemId;
use crate::state_machine::ItemStates;

/// Result of an admission request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Admission {
    /// `None` when every id was filtered out and no batch was created.
    pub batch_id: Option<BatchId>,
    pub admitted: usize,
    pub already_completed: usize,
    pub already_queued: usize,
    /// Unknown ids and ids filtered out by the batch's source settings.
    pub missing: usize,
}

impl Admission {
    pub fn is_noop(&self) -> bool {
        self.batch_id.is_none()
    }
}

/// Aggregate counts over the whole queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total_batches: usize,
    pub pending_batches: usize,
    pub completed_batches: usize,
    pub cancelled_batches: usize,
    pub total_items: usize,
    pub processed_items: usize,
    pub failed_items: usize,
    /// Items still waiting in pending batches.
    pub queued_items: usize,
}

/// One line of the all-batches status view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub id: BatchId,
    pub status: BatchStatus,
    pub total_count: usize,
    pub processed_count: usize,
    pub failed_count: usize,
    pub current_index: usize,
    pub retry_queue_len: usize,
    pub progress_percent: f64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Batch> for BatchSummary {
    fn from(b: &Batch) -> Self {
        Self {
            id: b.id.clone(),
            status: b.status,
            total_count: b.total_count,
            processed_count: b.processed_count,
            failed_count: b.failed_count,
            current_index: b.current_index,
            retry_queue_len: b.retry_queue.len(),
            progress_percent: b.progress_percent(),
            created_at: b.created_at,
            completed_at: b.completed_at,
        }
    }
}

/// Outcome of putting an item back into its originating batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    Queued,
    AlreadyQueued,
    /// The batch is gone or cancelled.
    BatchUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchQueue {
    batches: Vec<Batch>,
}

impl BatchQueue {
    /// Batches in insertion order.
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn batch(&self, id: &str) -> Option<&Batch> {
        self.batches.iter().find(|b| b.id == id)
    }

    pub fn batch_mut(&mut self, id: &str) -> Option<&mut Batch> {
        self.batches.iter_mut().find(|b| b.id == id)
    }

    /// Filters `ids` and appends a new pending batch with whatever survives.
    ///
    /// An id is dropped when `exists` rejects it, when it is already
    /// completed, or when a pending batch still has it in its remainder or
    /// retry queue. Duplicates inside `ids` are collapsed. Admitted items get
    /// their state entry pointed at the new batch.
    pub fn admit(
        &mut self,
        ids: &[ItemId],
        settings: BatchSettings,
        exists: impl Fn(ItemId) -> bool,
        items: &mut ItemStates,
        now: DateTime<Utc>,
    ) -> Admission {
        let queued = self.items_in_queue();
        let mut seen = BTreeSet::new();
        let mut report = Admission::default();
        let mut admitted = Vec::new();

        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            if !exists(id) {
                report.missing += 1;
            } else if items.is_completed(id) {
                report.already_completed += 1;
            } else if queued.contains(&id) {
                report.already_queued += 1;
            } else {
                admitted.push(id);
            }
        }

        report.admitted = admitted.len();
        if admitted.is_empty() {
            info!(
                requested = ids.len(),
                already_completed = report.already_completed,
                already_queued = report.already_queued,
                missing = report.missing,
                "nothing to admit"
            );
            return report;
        }

        let batch = Batch::new(admitted, settings, ids.len(), now);
        for &id in &batch.item_ids {
            items.entry(id).batch_id = Some(batch.id.clone());
        }
        info!(batch_id = %batch.id, admitted = report.admitted, "batch admitted");
        report.batch_id = Some(batch.id.clone());
        self.batches.push(batch);
        report
    }

    /// Union of the remainder and retry queue of every pending batch.
    pub fn items_in_queue(&self) -> BTreeSet<ItemId> {
        self.batches
            .iter()
            .filter(|b| b.is_pending())
            .flat_map(|b| b.remaining())
            .collect()
    }

    pub fn is_in_queue(&self, id: ItemId) -> bool {
        self.batches
            .iter()
            .filter(|b| b.is_pending())
            .any(|b| b.remaining().any(|queued| queued == id))
    }

    /// Item ids referenced by any pending batch, handled or not.
    pub fn active_item_ids(&self) -> BTreeSet<ItemId> {
        self.batches
            .iter()
            .filter(|b| b.is_pending())
            .flat_map(|b| b.item_ids.iter().copied().chain(b.retry_queue.iter().copied()))
            .collect()
    }

    pub fn has_pending_work(&self) -> bool {
        self.batches.iter().any(Batch::has_work)
    }

    /// First pending batch with work, and the slot it would serve next.
    pub fn next_work(&self) -> Option<(&Batch, WorkSlot)> {
        self.batches
            .iter()
            .find_map(|b| b.next_work().map(|slot| (b, slot)))
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total_batches: self.batches.len(),
            queued_items: self.items_in_queue().len(),
            ..Default::default()
        };
        for b in &self.batches {
            match b.status {
                BatchStatus::Pending => stats.pending_batches += 1,
                BatchStatus::Completed => stats.completed_batches += 1,
                BatchStatus::Cancelled => stats.cancelled_batches += 1,
            }
            stats.total_items += b.total_count;
            stats.processed_items += b.processed_count;
            stats.failed_items += b.failed_count;
        }
        stats
    }

    pub fn summaries(&self) -> Vec<BatchSummary> {
        self.batches.iter().map(BatchSummary::from).collect()
    }

    /// Puts a failed item back into batch `id`.
    pub fn requeue(&mut self, id: &str, item: ItemId) -> Requeue {
        match self.batch_mut(id) {
            Some(batch) if batch.status != BatchStatus::Cancelled => {
                if batch.enqueue_retry(item) {
                    Requeue::Queued
                } else {
                    Requeue::AlreadyQueued
                }
            }
            _ => Requeue::BatchUnavailable,
        }
    }

    /// Marks a pending batch cancelled. Returns `false` if it was not pending.
    pub fn cancel(&mut self, id: &str, now: DateTime<Utc>) -> Option<bool> {
        let batch = self.batch_mut(id)?;
        if !batch.is_pending() {
            return Some(false);
        }
        batch.status = BatchStatus::Cancelled;
        batch.completed_at = Some(now);
        Some(true)
    }

    /// Removes completed or cancelled batches created before `cutoff`.
    pub fn purge_finished(&mut self, cutoff: DateTime<Utc>) -> Vec<BatchId> {
        let mut purged = Vec::new();
        self.batches.retain(|b| {
            let expired = !b.is_pending() && b.created_at < cutoff;
            if expired {
                purged.push(b.id.clone());
            }
            !expired
        });
        purged
    }
}
