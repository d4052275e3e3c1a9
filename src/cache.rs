//! Deduplicates generation calls by `(content fingerprint, model id)`.
//!
//! Entries are immutable once written, so concurrent readers never observe a
//! half-updated value. The cache can be persisted to a JSON file so separate
//! CLI invocations share it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::QaPair;
use crate::store::{StoreError, read_json, write_json_atomic};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    pairs: Vec<QaPair>,
    stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub ttl_hours: i64,
}

pub struct ContentCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    path: Option<PathBuf>,
}

fn cache_key(fingerprint: &str, model: &str) -> String {
    format!("{model}:{fingerprint}")
}

impl ContentCache {
    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            path: None,
        }
    }

    /// Opens (or starts) a cache persisted at `path`; expired entries are dropped on load.
    pub fn open(path: &Path, ttl: Duration) -> Result<Self, StoreError> {
        let mut entries: HashMap<String, CacheEntry> = read_json(path)?.unwrap_or_default();
        let now = Utc::now();
        entries.retain(|_, e| now - e.stored_at < ttl);
        Ok(Self {
            entries: RwLock::new(entries),
            ttl,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn get(&self, fingerprint: &str, model: &str, now: DateTime<Utc>) -> Option<Vec<QaPair>> {
        let entries = self.entries.read();
        let entry = entries.get(&cache_key(fingerprint, model))?;
        if now - entry.stored_at >= self.ttl {
            debug!(model, "cache entry expired");
            return None;
        }
        Some(entry.pairs.clone())
    }

    pub fn put(
        &self,
        fingerprint: &str,
        model: &str,
        pairs: Vec<QaPair>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.entries.write().insert(
            cache_key(fingerprint, model),
            CacheEntry {
                pairs,
                stored_at: now,
            },
        );
        self.persist()
    }

    pub fn clear(&self) -> Result<usize, StoreError> {
        let removed = {
            let mut entries = self.entries.write();
            let n = entries.len();
            entries.clear();
            n
        };
        self.persist()?;
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.read().len(),
            ttl_hours: self.ttl.num_hours(),
        }
    }

    fn persist(&self) -> Result<(), StoreError> {
        match &self.path {
            Some(path) => write_json_atomic(path, &*self.entries.read()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(q: &str) -> QaPair {
        QaPair {
            question: q.into(),
            answer: "A".into(),
        }
    }

    #[test]
    fn hit_is_keyed_by_fingerprint_and_model() {
        let cache = ContentCache::in_memory(Duration::days(7));
        let now = Utc::now();
        cache.put("abc", "model-a", vec![pair("Q")], now).unwrap();

        assert_eq!(cache.get("abc", "model-a", now), Some(vec![pair("Q")]));
        assert_eq!(cache.get("abc", "model-b", now), None);
        assert_eq!(cache.get("abd", "model-a", now), None);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = ContentCache::in_memory(Duration::hours(1));
        let then = Utc::now() - Duration::hours(2);
        cache.put("abc", "m", vec![pair("Q")], then).unwrap();
        assert_eq!(cache.get("abc", "m", Utc::now()), None);
    }

    #[test]
    fn persisted_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        {
            let cache = ContentCache::open(&path, Duration::days(7)).unwrap();
            cache.put("abc", "m", vec![pair("Q")], Utc::now()).unwrap();
        }
        let reopened = ContentCache::open(&path, Duration::days(7)).unwrap();
        assert_eq!(reopened.stats().entries, 1);
        assert_eq!(reopened.clear().unwrap(), 1);
        assert_eq!(ContentCache::open(&path, Duration::days(7)).unwrap().stats().entries, 0);
    }
}
