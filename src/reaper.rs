//! Sweeps abandoned draft artifacts.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::artifacts::ArtifactStore;
use crate::content::ItemId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub deleted: usize,
    pub protected: usize,
    /// Deletions the store refused; retried on the next sweep.
    pub failed: usize,
}

/// Deletes drafts generated before `cutoff` unless their source item is in
/// `protected`. Individual deletion failures are counted, never raised.
pub fn reap_orphans(
    store: &dyn ArtifactStore,
    protected: &BTreeSet<ItemId>,
    cutoff: DateTime<Utc>,
) -> ReapReport {
    let mut report = ReapReport::default();
    for draft in store.stale_drafts(cutoff) {
        if protected.contains(&draft.source_item_id) {
            report.protected += 1;
            continue;
        }
        match store.delete(draft.id) {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                warn!(artifact_id = draft.id, error = %e, "failed to delete orphaned draft");
                report.failed += 1;
            }
        }
    }
    if report.deleted > 0 || report.protected > 0 {
        info!(
            deleted = report.deleted,
            protected = report.protected,
            "orphaned drafts swept"
        );
    }
    report
}
