use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BatchSettings;
use crate::content::ItemId;

pub type BatchId = String;

/// Tracks the lifecycle status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Completed,
    Cancelled,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Pending => write!(f, "pending"),
            BatchStatus::Completed => write!(f, "completed"),
            BatchStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Where the next unit of work of a batch comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkSlot {
    /// Front of the retry queue.
    Retry(ItemId),
    /// `item_ids[index]`, the item under the cursor.
    Positional { index: usize, item_id: ItemId },
}

impl WorkSlot {
    pub fn item_id(&self) -> ItemId {
        match self {
            WorkSlot::Retry(id) => *id,
            WorkSlot::Positional { item_id, .. } => *item_id,
        }
    }
}

/// An ordered group of work items processed under one settings snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub item_ids: Vec<ItemId>,
    /// Cursor into `item_ids`. Never decreases.
    pub current_index: usize,
    /// Items waiting for reprocessing, served before the cursor.
    #[serde(default)]
    pub retry_queue: VecDeque<ItemId>,
    pub status: BatchStatus,
    pub processed_count: usize,
    pub failed_count: usize,
    pub total_count: usize,
    #[serde(default)]
    pub failed_items: Vec<ItemId>,
    /// How many ids the caller asked for before filtering.
    #[serde(default)]
    pub requested_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Frozen at admission; used for every item of the batch.
    pub settings: BatchSettings,
}

impl Batch {
    pub fn new(
        item_ids: Vec<ItemId>,
        settings: BatchSettings,
        requested_count: usize,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("batch_{}", Uuid::new_v4().simple()),
            total_count: item_ids.len(),
            item_ids,
            current_index: 0,
            retry_queue: VecDeque::new(),
            status: BatchStatus::Pending,
            processed_count: 0,
            failed_count: 0,
            failed_items: Vec::new(),
            requested_count,
            created_at: now,
            completed_at: None,
            settings,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == BatchStatus::Pending
    }

    /// Items not yet handled: the cursor remainder plus the retry queue.
    pub fn remaining(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.item_ids
            .get(self.current_index..)
            .unwrap_or_default()
            .iter()
            .copied()
            .chain(self.retry_queue.iter().copied())
    }

    /// True when the batch is pending and has something left to do.
    pub fn has_work(&self) -> bool {
        self.is_pending() && (!self.retry_queue.is_empty() || self.current_index < self.total_count)
    }

    /// The next unit of work, retry queue first. Does not mutate.
    pub fn next_work(&self) -> Option<WorkSlot> {
        if !self.is_pending() {
            return None;
        }
        if let Some(&id) = self.retry_queue.front() {
            return Some(WorkSlot::Retry(id));
        }
        self.item_ids
            .get(self.current_index)
            .filter(|_| self.current_index < self.total_count)
            .map(|&item_id| WorkSlot::Positional {
                index: self.current_index,
                item_id,
            })
    }

    /// Books the outcome of one unit of work.
    ///
    /// A retry slot is removed from the retry queue; a positional slot moves
    /// the cursor past `index` whatever the outcome. Slots that no longer
    /// match the batch (it changed while the item was in flight) only update
    /// the counters.
    pub fn record(&mut self, slot: WorkSlot, succeeded: bool, now: DateTime<Utc>) {
        match slot {
            WorkSlot::Retry(id) => {
                if let Some(pos) = self.retry_queue.iter().position(|&queued| queued == id) {
                    self.retry_queue.remove(pos);
                }
            }
            WorkSlot::Positional { index, .. } => {
                self.current_index = self.current_index.max(index + 1);
            }
        }

        if succeeded {
            self.processed_count += 1;
        } else {
            self.failed_count += 1;
            if !self.failed_items.contains(&slot.item_id()) {
                self.failed_items.push(slot.item_id());
            }
        }
        self.check_completion(now);
    }

    /// Marks the batch completed once the cursor is exhausted and nothing
    /// waits for retry. Returns whether the batch is now completed.
    pub fn check_completion(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_pending() && self.retry_queue.is_empty() && self.current_index >= self.total_count
        {
            self.status = BatchStatus::Completed;
            self.completed_at = Some(now);
        }
        self.status == BatchStatus::Completed
    }

    /// Queues `id` for another attempt, reopening a completed batch.
    ///
    /// `failed_count` is decremented by one on every accepted retry.
    /// Returns `false` when the id was already queued.
    pub fn enqueue_retry(&mut self, id: ItemId) -> bool {
        if self.retry_queue.contains(&id) {
            return false;
        }
        self.retry_queue.push_back(id);
        self.failed_items.retain(|&failed| failed != id);
        self.failed_count = self.failed_count.saturating_sub(1);
        if self.status == BatchStatus::Completed {
            self.status = BatchStatus::Pending;
            self.completed_at = None;
        }
        true
    }

    /// `processed / total` as a percentage rounded to one decimal.
    pub fn progress_percent(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        let pct = self.processed_count as f64 / self.total_count as f64 * 100.0;
        (pct * 10.0).round() / 10.0
    }
}
