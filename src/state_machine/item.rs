use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactId;
use crate::content::ItemId;
use crate::queue::BatchId;

/// Lifecycle status of a work item.
///
/// `pending → processing → {completed | failed}`; `failed → pending` only
/// through an explicit retry. `completed` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "pending"),
            ItemStatus::Processing => write!(f, "processing"),
            ItemStatus::Completed => write!(f, "completed"),
            ItemStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Per-item metadata kept across batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemState {
    pub status: ItemStatus,
    /// Number of failed attempts. Never decreases.
    #[serde(default)]
    pub fail_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    /// Batch that last admitted the item.
    #[serde(default)]
    pub batch_id: Option<BatchId>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Artifacts published by the successful attempt.
    #[serde(default)]
    pub artifact_ids: Vec<ArtifactId>,
}

/// A failed item as shown to an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub item_id: ItemId,
    pub fail_count: u32,
    pub last_error: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
    pub batch_id: Option<BatchId>,
}

/// The item state store snapshot. Entries are created on first admission and
/// never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemStates {
    items: BTreeMap<ItemId, ItemState>,
}

impl ItemStates {
    pub fn get(&self, id: ItemId) -> Option<&ItemState> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut ItemState> {
        self.items.get_mut(&id)
    }

    /// The entry for `id`, created as `pending` if the item is new.
    pub fn entry(&mut self, id: ItemId) -> &mut ItemState {
        self.items.entry(id).or_default()
    }

    /// Status of an item; unknown items are `pending`.
    pub fn status(&self, id: ItemId) -> ItemStatus {
        self.items.get(&id).map(|s| s.status).unwrap_or_default()
    }

    pub fn is_completed(&self, id: ItemId) -> bool {
        self.status(id) == ItemStatus::Completed
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ItemId, &ItemState)> {
        self.items.iter().map(|(id, state)| (*id, state))
    }

    /// Failed items, most recently failed first.
    pub fn failed(&self, limit: usize) -> Vec<FailedItem> {
        let mut failed: Vec<FailedItem> = self
            .iter()
            .filter(|(_, s)| s.status == ItemStatus::Failed)
            .map(|(item_id, s)| FailedItem {
                item_id,
                fail_count: s.fail_count,
                last_error: s.last_error.clone(),
                failed_at: s.failed_at,
                batch_id: s.batch_id.clone(),
            })
            .collect();
        failed.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        failed.truncate(limit);
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn unknown_items_read_as_pending() {
        let states = ItemStates::default();
        assert_eq!(states.status(42), ItemStatus::Pending);
        assert!(states.get(42).is_none());
    }

    #[test]
    fn failed_listing_is_newest_first_and_limited() {
        let mut states = ItemStates::default();
        let now = Utc::now();
        for (id, age) in [(1, 3), (2, 1), (3, 2)] {
            let s = states.entry(id);
            s.status = ItemStatus::Failed;
            s.fail_count = 1;
            s.failed_at = Some(now - Duration::minutes(age));
        }
        states.entry(4).status = ItemStatus::Completed;

        let ids: Vec<ItemId> = states.failed(2).iter().map(|f| f.item_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn serializes_as_a_plain_map() {
        let mut states = ItemStates::default();
        states.entry(7).status = ItemStatus::Processing;
        let json = serde_json::to_value(&states).unwrap();
        assert_eq!(json["7"]["status"], "processing");
        let back: ItemStates = serde_json::from_value(json).unwrap();
        assert_eq!(back, states);
    }
}
