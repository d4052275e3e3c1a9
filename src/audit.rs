//! Processing audit trail.
//!
//! The pipeline writes one entry per attempt through [`AuditLog`]; write
//! failures are logged by the caller and never abort processing. The
//! [`AuditJournal`] keeps entries in a JSON file and answers history and
//! statistics queries.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactId;
use crate::content::ItemId;
use crate::store::{StoreError, read_json, write_json_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptStatus::Processing => write!(f, "processing"),
            AttemptStatus::Completed => write!(f, "completed"),
            AttemptStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One processing attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingLogEntry {
    pub source_item_id: ItemId,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub artifact_ids: Vec<ArtifactId>,
    pub artifact_count: usize,
    pub status: AttemptStatus,
    pub error: Option<String>,
}

/// Write contract used by the pipeline.
pub trait AuditLog: Send + Sync {
    /// Opens an attempt in `processing` state.
    fn log_attempt(
        &self,
        source: ItemId,
        model: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Closes the open attempt for `source`.
    fn update_result(
        &self,
        source: ItemId,
        artifact_ids: &[ArtifactId],
        status: AttemptStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Aggregates over the journal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditStatistics {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub artifacts_created: usize,
    pub last_30_days: usize,
    pub model_usage: BTreeMap<String, usize>,
    pub most_used_model: Option<String>,
}

pub struct AuditJournal {
    entries: Mutex<Vec<ProcessingLogEntry>>,
    path: Option<PathBuf>,
}

impl AuditJournal {
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            path: None,
        }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            entries: Mutex::new(read_json(path)?.unwrap_or_default()),
            path: Some(path.to_path_buf()),
        })
    }

    /// Most recent attempts first.
    pub fn recent(&self, limit: usize) -> Vec<ProcessingLogEntry> {
        let mut entries = self.entries.lock().clone();
        entries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        entries.truncate(limit);
        entries
    }

    pub fn statistics(&self, now: DateTime<Utc>) -> AuditStatistics {
        let entries = self.entries.lock();
        let month_ago = now - Duration::days(30);
        let mut stats = AuditStatistics {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries.iter() {
            match entry.status {
                AttemptStatus::Completed => stats.succeeded += 1,
                AttemptStatus::Failed => stats.failed += 1,
                AttemptStatus::Processing => {}
            }
            stats.artifacts_created += entry.artifact_count;
            if entry.started_at > month_ago {
                stats.last_30_days += 1;
            }
            *stats.model_usage.entry(entry.model.clone()).or_default() += 1;
        }
        // Ties go to the alphabetically first model.
        stats.most_used_model = stats
            .model_usage
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(model, _)| model.clone());
        stats
    }

    /// Drops entries started before `cutoff`. Returns how many were removed.
    pub fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.started_at >= cutoff);
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries)?;
        }
        Ok(removed)
    }

    fn persist(&self, entries: &[ProcessingLogEntry]) -> Result<(), StoreError> {
        match &self.path {
            Some(path) => write_json_atomic(path, entries),
            None => Ok(()),
        }
    }
}

impl AuditLog for AuditJournal {
    fn log_attempt(
        &self,
        source: ItemId,
        model: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        entries.push(ProcessingLogEntry {
            source_item_id: source,
            model: model.to_string(),
            started_at: now,
            completed_at: None,
            artifact_ids: Vec::new(),
            artifact_count: 0,
            status: AttemptStatus::Processing,
            error: None,
        });
        self.persist(&entries)
    }

    fn update_result(
        &self,
        source: ItemId,
        artifact_ids: &[ArtifactId],
        status: AttemptStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let open = entries
            .iter_mut()
            .rev()
            .find(|e| e.source_item_id == source && e.status == AttemptStatus::Processing);
        let Some(entry) = open else {
            return Ok(());
        };
        entry.completed_at = Some(now);
        entry.artifact_ids = artifact_ids.to_vec();
        entry.artifact_count = artifact_ids.len();
        entry.status = status;
        entry.error = error.map(str::to_string);
        self.persist(&entries)
    }
}
