//! Two-phase creation of derived question/answer artifacts.
//!
//! Every pair becomes a draft (`pending_publish`) first; drafts are then
//! promoted to `published`. A failed attempt never leaves its own drafts
//! behind: either nothing survives, or exactly the published subset does.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BatchSettings;
use crate::content::{ItemId, SourceItem, strip_markup, trim_words};
use crate::error::ArtifactCreationError;
use crate::llm::QaPair;

pub type ArtifactId = u64;

const EXCERPT_WORDS: usize = 55;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    PendingPublish,
    Published,
}

/// A derived content item produced from one question/answer pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub id: ArtifactId,
    pub source_item_id: ItemId,
    pub target_type: String,
    pub target_filter: Option<String>,
    pub title: String,
    pub body: String,
    pub excerpt: String,
    pub terms: Vec<String>,
    pub draft_status: DraftStatus,
    pub generated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Everything needed to create a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArtifact {
    pub source_item_id: ItemId,
    pub target_type: String,
    pub target_filter: Option<String>,
    pub title: String,
    pub body: String,
    pub excerpt: String,
    pub terms: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl NewArtifact {
    pub fn from_pair(
        pair: &QaPair,
        source: &SourceItem,
        settings: &BatchSettings,
        now: DateTime<Utc>,
    ) -> Self {
        let answer = pair.answer.trim();
        let attribution = match &source.permalink {
            Some(link) => format!("Source: {} ({link})", source.title),
            None => format!("Source: {}", source.title),
        };
        Self {
            source_item_id: source.id,
            target_type: settings.target_type.clone(),
            target_filter: settings.target_filter.clone(),
            title: strip_markup(&pair.question),
            body: format!("{answer}\n\n{attribution}"),
            excerpt: trim_words(&strip_markup(answer), EXCERPT_WORDS),
            terms: source.terms.clone(),
            generated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    #[error("artifact {0} does not exist")]
    NotFound(ArtifactId),

    #[error("artifact store rejected the operation: {0}")]
    Rejected(String),
}

/// Write access to the target content system.
pub trait ArtifactStore: Send + Sync {
    fn create_draft(&self, draft: NewArtifact) -> Result<ArtifactId, ArtifactError>;

    /// Promotes a draft; publishing an already published artifact is a no-op.
    fn publish(&self, id: ArtifactId, now: DateTime<Utc>) -> Result<(), ArtifactError>;

    /// Deletes irrecoverably.
    fn delete(&self, id: ArtifactId) -> Result<(), ArtifactError>;

    fn artifact(&self, id: ArtifactId) -> Option<GeneratedArtifact>;

    /// Drafts still `pending_publish` that were generated before `cutoff`.
    fn stale_drafts(&self, cutoff: DateTime<Utc>) -> Vec<GeneratedArtifact>;

    /// Drafts still `pending_publish` derived from `source`.
    fn drafts_for(&self, source: ItemId) -> Vec<GeneratedArtifact>;
}

/// Outcome of the publish phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub published: Vec<ArtifactId>,
    pub failed: Vec<ArtifactId>,
}

/// Runs the draft → publish protocol against an [`ArtifactStore`].
pub struct ArtifactCreator<'a> {
    store: &'a dyn ArtifactStore,
}

impl<'a> ArtifactCreator<'a> {
    pub fn new(store: &'a dyn ArtifactStore) -> Self {
        Self { store }
    }

    /// Phase 1: one draft per pair. Individual failures are logged and skipped.
    pub fn create_drafts(
        &self,
        pairs: &[QaPair],
        source: &SourceItem,
        settings: &BatchSettings,
        now: DateTime<Utc>,
    ) -> Vec<ArtifactId> {
        pairs
            .iter()
            .filter_map(|pair| {
                let draft = NewArtifact::from_pair(pair, source, settings, now);
                match self.store.create_draft(draft) {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!(item_id = source.id, error = %e, "failed to create draft artifact");
                        None
                    }
                }
            })
            .collect()
    }

    /// Phase 2: promote every draft still pending.
    pub fn publish_drafts(&self, ids: &[ArtifactId], now: DateTime<Utc>) -> PublishReport {
        let mut report = PublishReport::default();
        for &id in ids {
            let pending = self
                .store
                .artifact(id)
                .is_some_and(|a| a.draft_status == DraftStatus::PendingPublish);
            if !pending {
                continue;
            }
            match self.store.publish(id, now) {
                Ok(()) => report.published.push(id),
                Err(e) => {
                    warn!(artifact_id = id, error = %e, "failed to publish draft artifact");
                    report.failed.push(id);
                }
            }
        }
        report
    }

    /// Deletes the given artifacts that are still drafts; published ones are
    /// never touched. Returns how many were deleted.
    pub fn cleanup_drafts(&self, ids: &[ArtifactId]) -> usize {
        let mut deleted = 0;
        for &id in ids {
            let is_draft = self
                .store
                .artifact(id)
                .is_some_and(|a| a.draft_status == DraftStatus::PendingPublish);
            if !is_draft {
                continue;
            }
            match self.store.delete(id) {
                Ok(()) => deleted += 1,
                Err(e) => warn!(artifact_id = id, error = %e, "failed to delete draft artifact"),
            }
        }
        deleted
    }

    /// Full protocol for one processing attempt. Returns the ids of the
    /// artifacts that ended up published.
    pub fn create_and_publish(
        &self,
        pairs: &[QaPair],
        source: &SourceItem,
        settings: &BatchSettings,
        now: DateTime<Utc>,
    ) -> Result<Vec<ArtifactId>, ArtifactCreationError> {
        let drafts = self.create_drafts(pairs, source, settings, now);
        if drafts.is_empty() {
            return Err(ArtifactCreationError::NoDrafts {
                attempted: pairs.len(),
            });
        }
        debug!(item_id = source.id, drafts = drafts.len(), "created draft artifacts");

        let report = self.publish_drafts(&drafts, now);
        if report.published.is_empty() {
            let removed = self.cleanup_drafts(&drafts);
            debug!(item_id = source.id, removed, "rolled back unpublished drafts");
            return Err(ArtifactCreationError::NothingPublished {
                drafts: drafts.len(),
            });
        }
        if !report.failed.is_empty() {
            self.cleanup_drafts(&report.failed);
        }
        Ok(report.published)
    }
}
