//! A JSON-file content library: source items in, generated artifacts out.
//!
//! This is the content system the CLI works against. It implements both
//! [`ContentSource`] and [`ArtifactStore`]; every mutation is written back
//! to disk before returning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::artifacts::{
    ArtifactError, ArtifactId, ArtifactStore, DraftStatus, GeneratedArtifact, NewArtifact,
};
use crate::content::{ContentSource, ItemId, SourceItem};
use crate::store::{StoreError, read_json, write_json_atomic};

#[derive(Debug, Default, Serialize, Deserialize)]
struct LibraryData {
    #[serde(default)]
    items: BTreeMap<ItemId, SourceItem>,
    #[serde(default)]
    artifacts: BTreeMap<ArtifactId, GeneratedArtifact>,
    #[serde(default)]
    next_artifact_id: ArtifactId,
}

pub struct Library {
    data: Mutex<LibraryData>,
    path: Option<PathBuf>,
}

impl Library {
    pub fn in_memory() -> Self {
        Self {
            data: Mutex::new(LibraryData::default()),
            path: None,
        }
    }

    /// Opens the library at `path`; a missing file is an empty library.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let data = read_json(path)?.unwrap_or_default();
        Ok(Self {
            data: Mutex::new(data),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn insert_item(&self, item: SourceItem) -> Result<(), StoreError> {
        let mut data = self.data.lock();
        data.items.insert(item.id, item);
        self.persist(&data)
    }

    /// Inserts an artifact as-is; used to import existing content.
    pub fn insert_artifact(&self, artifact: GeneratedArtifact) -> Result<(), StoreError> {
        let mut data = self.data.lock();
        data.next_artifact_id = data.next_artifact_id.max(artifact.id + 1);
        data.artifacts.insert(artifact.id, artifact);
        self.persist(&data)
    }

    pub fn artifacts(&self) -> Vec<GeneratedArtifact> {
        self.data.lock().artifacts.values().cloned().collect()
    }

    pub fn artifacts_for(&self, source: ItemId) -> Vec<GeneratedArtifact> {
        self.data
            .lock()
            .artifacts
            .values()
            .filter(|a| a.source_item_id == source)
            .cloned()
            .collect()
    }

    fn persist(&self, data: &LibraryData) -> Result<(), StoreError> {
        match &self.path {
            Some(path) => write_json_atomic(path, data),
            None => Ok(()),
        }
    }
}

fn rejected(err: StoreError) -> ArtifactError {
    ArtifactError::Rejected(err.to_string())
}

impl ContentSource for Library {
    fn get(&self, id: ItemId) -> Option<SourceItem> {
        self.data.lock().items.get(&id).cloned()
    }
}

impl ArtifactStore for Library {
    fn create_draft(&self, draft: NewArtifact) -> Result<ArtifactId, ArtifactError> {
        let mut data = self.data.lock();
        data.next_artifact_id = data.next_artifact_id.max(1);
        let id = data.next_artifact_id;
        data.next_artifact_id += 1;
        data.artifacts.insert(
            id,
            GeneratedArtifact {
                id,
                source_item_id: draft.source_item_id,
                target_type: draft.target_type,
                target_filter: draft.target_filter,
                title: draft.title,
                body: draft.body,
                excerpt: draft.excerpt,
                terms: draft.terms,
                draft_status: DraftStatus::PendingPublish,
                generated_at: draft.generated_at,
                published_at: None,
            },
        );
        self.persist(&data).map_err(rejected)?;
        Ok(id)
    }

    fn publish(&self, id: ArtifactId, now: DateTime<Utc>) -> Result<(), ArtifactError> {
        let mut data = self.data.lock();
        let artifact = data
            .artifacts
            .get_mut(&id)
            .ok_or(ArtifactError::NotFound(id))?;
        if artifact.draft_status == DraftStatus::Published {
            return Ok(());
        }
        artifact.draft_status = DraftStatus::Published;
        artifact.published_at = Some(now);
        self.persist(&data).map_err(rejected)
    }

    fn delete(&self, id: ArtifactId) -> Result<(), ArtifactError> {
        let mut data = self.data.lock();
        data.artifacts
            .remove(&id)
            .ok_or(ArtifactError::NotFound(id))?;
        self.persist(&data).map_err(rejected)
    }

    fn artifact(&self, id: ArtifactId) -> Option<GeneratedArtifact> {
        self.data.lock().artifacts.get(&id).cloned()
    }

    fn stale_drafts(&self, cutoff: DateTime<Utc>) -> Vec<GeneratedArtifact> {
        self.data
            .lock()
            .artifacts
            .values()
            .filter(|a| a.draft_status == DraftStatus::PendingPublish && a.generated_at < cutoff)
            .cloned()
            .collect()
    }

    fn drafts_for(&self, source: ItemId) -> Vec<GeneratedArtifact> {
        self.data
            .lock()
            .artifacts
            .values()
            .filter(|a| a.draft_status == DraftStatus::PendingPublish && a.source_item_id == source)
            .cloned()
            .collect()
    }
}
