//! Processing of one work item: extract, generate (cache first), draft,
//! publish, audit.
//!
//! Item state bookkeeping stays with the driver; the pipeline only returns
//! the outcome.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::artifacts::{ArtifactCreator, ArtifactId, ArtifactStore};
use crate::audit::{AttemptStatus, AuditLog};
use crate::config::BatchSettings;
use crate::content::{ContentSource, ItemId};
use crate::error::{ExtractionError, ProcessingError};
use crate::llm::{ChatBackend, TransformationClient};

/// What a successful attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub artifact_ids: Vec<ArtifactId>,
    /// The pairs came from the content cache.
    pub cached: bool,
}

pub struct Pipeline<B> {
    content: Arc<dyn ContentSource>,
    artifacts: Arc<dyn ArtifactStore>,
    audit: Arc<dyn AuditLog>,
    transformer: TransformationClient<B>,
}

impl<B: ChatBackend> Pipeline<B> {
    pub fn new(
        content: Arc<dyn ContentSource>,
        artifacts: Arc<dyn ArtifactStore>,
        audit: Arc<dyn AuditLog>,
        transformer: TransformationClient<B>,
    ) -> Self {
        Self {
            content,
            artifacts,
            audit,
            transformer,
        }
    }

    pub fn transformer(&self) -> &TransformationClient<B> {
        &self.transformer
    }

    /// Runs one attempt for `item_id` under `settings`.
    ///
    /// On failure every draft of the item still pending is deleted before
    /// the error is returned, and the attempt is audited as failed.
    pub async fn process(
        &self,
        item_id: ItemId,
        settings: &BatchSettings,
    ) -> Result<Processed, ProcessingError> {
        if let Err(e) = self.audit.log_attempt(item_id, &settings.model_id, Utc::now()) {
            warn!(item_id, error = %e, "failed to write audit entry");
        }

        match self.attempt(item_id, settings).await {
            Ok(done) => {
                self.audit_result(item_id, &done.artifact_ids, AttemptStatus::Completed, None);
                info!(
                    item_id,
                    artifacts = done.artifact_ids.len(),
                    cached = done.cached,
                    "item processed"
                );
                Ok(done)
            }
            Err(err) => {
                self.discard_drafts(item_id);
                let message = err.to_string();
                self.audit_result(item_id, &[], AttemptStatus::Failed, Some(&message));
                Err(err)
            }
        }
    }

    async fn attempt(
        &self,
        item_id: ItemId,
        settings: &BatchSettings,
    ) -> Result<Processed, ProcessingError> {
        let extracted = self.content.extract(item_id)?;
        let generated = self.transformer.generate(&extracted, settings).await?;

        // The item may have been removed while the service was answering.
        let source = self
            .content
            .get(item_id)
            .ok_or(ExtractionError::NotFound(item_id))?;
        let creator = ArtifactCreator::new(self.artifacts.as_ref());
        let artifact_ids =
            creator.create_and_publish(&generated.pairs, &source, settings, Utc::now())?;
        Ok(Processed {
            artifact_ids,
            cached: generated.cached,
        })
    }

    fn discard_drafts(&self, item_id: ItemId) {
        let drafts: Vec<ArtifactId> = self
            .artifacts
            .drafts_for(item_id)
            .into_iter()
            .map(|a| a.id)
            .collect();
        if drafts.is_empty() {
            return;
        }
        let removed = ArtifactCreator::new(self.artifacts.as_ref()).cleanup_drafts(&drafts);
        info!(item_id, removed, "discarded drafts of failed item");
    }

    fn audit_result(
        &self,
        item_id: ItemId,
        artifact_ids: &[ArtifactId],
        status: AttemptStatus,
        error: Option<&str>,
    ) {
        if let Err(e) = self
            .audit
            .update_result(item_id, artifact_ids, status, error, Utc::now())
        {
            warn!(item_id, error = %e, "failed to write audit result");
        }
    }
}
