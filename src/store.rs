//! Persistence for the batch queue, item states and scheduler marks.
//!
//! Each part is an opaque snapshot that is read and written whole. The
//! scheduler marks (lock expiry, next armed run, last tick) are small and
//! updated through a closure so check-and-set stays atomic. On disk both the
//! marks update and the snapshot read-modify-write sequences are guarded by
//! advisory file locks, so separate processes sharing a state directory
//! serialize with each other.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::BatchQueue;
use crate::state_machine::ItemStates;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt snapshot {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Process-wide scheduling state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerMarks {
    /// Expiry of the single-flight lock; `None` when no tick holds it.
    pub lock_expires_at: Option<DateTime<Utc>>,
    /// When the armed one-shot trigger is due.
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_tick_at: Option<DateTime<Utc>>,
}

/// Held while snapshots are read, changed and written back. Releases the
/// underlying file lock (if any) on drop.
#[derive(Debug)]
pub struct SnapshotLock {
    _file: Option<File>,
}

impl SnapshotLock {
    /// A guard with nothing to release, for stores private to one process.
    pub fn in_process() -> Self {
        Self { _file: None }
    }
}

pub trait StateStore: Send + Sync {
    fn load_queue(&self) -> Result<BatchQueue, StoreError>;
    fn save_queue(&self, queue: &BatchQueue) -> Result<(), StoreError>;

    fn load_items(&self) -> Result<ItemStates, StoreError>;
    fn save_items(&self, items: &ItemStates) -> Result<(), StoreError>;

    fn marks(&self) -> Result<SchedulerMarks, StoreError>;

    /// Exclusive access to the queue and item snapshots until the returned
    /// guard is dropped. Every load-then-save sequence runs under it.
    fn lock_snapshots(&self) -> Result<SnapshotLock, StoreError>;

    /// Applies `f` to the marks and persists the result atomically with
    /// respect to other callers of this store.
    fn update_marks(
        &self,
        f: &mut dyn FnMut(&mut SchedulerMarks),
    ) -> Result<SchedulerMarks, StoreError>;
}

#[derive(Debug, Default)]
struct Snapshot {
    queue: BatchQueue,
    items: ItemStates,
    marks: SchedulerMarks,
}

/// Keeps everything in memory. Used by tests and embedders that persist
/// elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load_queue(&self) -> Result<BatchQueue, StoreError> {
        Ok(self.inner.lock().queue.clone())
    }

    fn save_queue(&self, queue: &BatchQueue) -> Result<(), StoreError> {
        self.inner.lock().queue = queue.clone();
        Ok(())
    }

    fn load_items(&self) -> Result<ItemStates, StoreError> {
        Ok(self.inner.lock().items.clone())
    }

    fn save_items(&self, items: &ItemStates) -> Result<(), StoreError> {
        self.inner.lock().items = items.clone();
        Ok(())
    }

    fn marks(&self) -> Result<SchedulerMarks, StoreError> {
        Ok(self.inner.lock().marks.clone())
    }

    fn update_marks(
        &self,
        f: &mut dyn FnMut(&mut SchedulerMarks),
    ) -> Result<SchedulerMarks, StoreError> {
        let mut inner = self.inner.lock();
        f(&mut inner.marks);
        Ok(inner.marks.clone())
    }

    // Callers serialize among themselves; nothing outside this process
    // can see the snapshots.
    fn lock_snapshots(&self) -> Result<SnapshotLock, StoreError> {
        Ok(SnapshotLock::in_process())
    }
}

/// One JSON file per snapshot inside a state directory.
///
/// Any number of stores, in any number of processes, may share a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Blocks until this process holds an exclusive lock on `name`. The
    /// lock is released when the returned file is closed.
    fn lock_file(&self, name: &str) -> Result<File, StoreError> {
        let path = self.path(name);
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(io_err)?;
        file.lock_exclusive().map_err(io_err)?;
        Ok(file)
    }
}

const QUEUE_FILE: &str = "queue.json";
const ITEMS_FILE: &str = "items.json";
const MARKS_FILE: &str = "scheduler.json";
const MARKS_LOCK: &str = "scheduler.lock";
const SNAPSHOTS_LOCK: &str = "snapshots.lock";

impl StateStore for FileStore {
    fn load_queue(&self) -> Result<BatchQueue, StoreError> {
        Ok(read_json(&self.path(QUEUE_FILE))?.unwrap_or_default())
    }

    fn save_queue(&self, queue: &BatchQueue) -> Result<(), StoreError> {
        write_json_atomic(&self.path(QUEUE_FILE), queue)
    }

    fn load_items(&self) -> Result<ItemStates, StoreError> {
        Ok(read_json(&self.path(ITEMS_FILE))?.unwrap_or_default())
    }

    fn save_items(&self, items: &ItemStates) -> Result<(), StoreError> {
        write_json_atomic(&self.path(ITEMS_FILE), items)
    }

    fn marks(&self) -> Result<SchedulerMarks, StoreError> {
        Ok(read_json(&self.path(MARKS_FILE))?.unwrap_or_default())
    }

    fn update_marks(
        &self,
        f: &mut dyn FnMut(&mut SchedulerMarks),
    ) -> Result<SchedulerMarks, StoreError> {
        let _lock = self.lock_file(MARKS_LOCK)?;
        let path = self.path(MARKS_FILE);
        let mut marks: SchedulerMarks = read_json(&path)?.unwrap_or_default();
        f(&mut marks);
        write_json_atomic(&path, &marks)?;
        Ok(marks)
    }

    fn lock_snapshots(&self) -> Result<SnapshotLock, StoreError> {
        Ok(SnapshotLock {
            _file: Some(self.lock_file(SNAPSHOTS_LOCK)?),
        })
    }
}

/// Reads a JSON snapshot; `Ok(None)` when the file does not exist yet.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes to a sibling temp file, then renames over the target.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchSettings;
    use chrono::Duration;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn missing_files_load_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.load_queue().unwrap().batches().is_empty());
        assert_eq!(store.load_items().unwrap().len(), 0);
        assert_eq!(store.marks().unwrap(), SchedulerMarks::default());
    }

    #[test]
    fn queue_and_items_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let now = Utc::now();

        let mut queue = BatchQueue::default();
        let mut items = ItemStates::default();
        let admission = queue.admit(&[1, 2], BatchSettings::default(), |_| true, &mut items, now);
        store.save_queue(&queue).unwrap();
        store.save_items(&items).unwrap();

        let loaded = store.load_queue().unwrap();
        let id = admission.batch_id.unwrap();
        assert_eq!(loaded.batch(&id).unwrap().item_ids, vec![1, 2]);
        assert_eq!(store.load_items().unwrap().get(1).unwrap().batch_id, Some(id));
    }

    #[test]
    fn update_marks_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let due = Utc::now() + Duration::seconds(30);
        store
            .update_marks(&mut |m| m.next_run_at = Some(due))
            .unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.marks().unwrap().next_run_at, Some(due));
    }

    #[test]
    fn snapshot_updates_from_separate_stores_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = dir.path().to_path_buf();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let store = FileStore::open(&path).unwrap();
                    barrier.wait();
                    for _ in 0..25 {
                        let _lock = store.lock_snapshots().unwrap();
                        let mut items = store.load_items().unwrap();
                        items.entry(1).fail_count += 1;
                        store.save_items(&items).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.load_items().unwrap().get(1).unwrap().fail_count, 100);
    }

    #[test]
    fn marks_updates_from_separate_stores_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let base = Utc::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = dir.path().to_path_buf();
                thread::spawn(move || {
                    let store = FileStore::open(&path).unwrap();
                    for _ in 0..25 {
                        store
                            .update_marks(&mut |m| {
                                let last = m.last_tick_at.unwrap_or(base);
                                m.last_tick_at = Some(last + Duration::seconds(1));
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(
            store.marks().unwrap().last_tick_at,
            Some(base + Duration::seconds(100))
        );
    }

    #[test]
    fn corrupt_snapshot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(QUEUE_FILE), b"{not json").unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(store.load_queue(), Err(StoreError::Json { .. })));
    }
}
