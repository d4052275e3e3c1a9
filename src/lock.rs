//! The single-flight processing lock.
//!
//! The lock is an expiry timestamp kept in the scheduler marks. A lock whose
//! expiry has passed is stale and is reclaimed by the next acquirer, which is
//! the only crash recovery there is.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::store::{StateStore, StoreError};
use crate::trigger::saturating_after;

/// Result of trying to take the lock.
pub enum LockAttempt {
    Acquired(LockGuard),
    /// Another tick holds an unexpired lock.
    Contended { expires_at: DateTime<Utc> },
}

pub struct ProcessingLock {
    store: Arc<dyn StateStore>,
    horizon: Duration,
}

impl ProcessingLock {
    pub fn new(store: Arc<dyn StateStore>, horizon: Duration) -> Self {
        Self { store, horizon }
    }

    /// Takes the lock unless an unexpired one is held.
    pub fn acquire(&self, now: DateTime<Utc>) -> Result<LockAttempt, StoreError> {
        let expires_at = saturating_after(now, self.horizon);
        let mut held = None;
        let mut reclaimed = None;
        self.store.update_marks(&mut |marks| {
            held = None;
            reclaimed = None;
            match marks.lock_expires_at {
                Some(existing) if existing > now => held = Some(existing),
                existing => {
                    reclaimed = existing;
                    marks.lock_expires_at = Some(expires_at);
                }
            }
        })?;

        if let Some(existing) = held {
            return Ok(LockAttempt::Contended {
                expires_at: existing,
            });
        }
        if let Some(stale) = reclaimed {
            warn!(expired_at = %stale, "reclaiming stale processing lock");
        }
        debug!(%expires_at, "processing lock acquired");
        Ok(LockAttempt::Acquired(LockGuard {
            store: Arc::clone(&self.store),
            token: expires_at,
            released: false,
        }))
    }

    /// Expiry of the lock if one is held and not stale.
    pub fn holder(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .store
            .marks()?
            .lock_expires_at
            .filter(|&expires_at| expires_at > now))
    }
}

/// Releases the lock when dropped.
///
/// Release only clears the lock if it still carries the expiry this guard
/// wrote, so a guard that outlived its horizon cannot free a successor's lock.
pub struct LockGuard {
    store: Arc<dyn StateStore>,
    token: DateTime<Utc>,
    released: bool,
}

impl LockGuard {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.token
    }

    /// Explicit release, surfacing store errors.
    pub fn release(mut self) -> Result<(), StoreError> {
        self.released = true;
        self.clear()
    }

    fn clear(&self) -> Result<(), StoreError> {
        let token = self.token;
        self.store.update_marks(&mut |marks| {
            if marks.lock_expires_at == Some(token) {
                marks.lock_expires_at = None;
            }
        })?;
        debug!("processing lock released");
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.clear() {
            warn!(error = %e, "failed to release processing lock; it will expire on its own");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn lock() -> (Arc<MemoryStore>, ProcessingLock) {
        let store = Arc::new(MemoryStore::new());
        let lock = ProcessingLock::new(store.clone(), Duration::seconds(300));
        (store, lock)
    }

    #[test]
    fn second_acquire_is_contended_until_release() {
        let (_, lock) = lock();
        let now = Utc::now();
        let LockAttempt::Acquired(guard) = lock.acquire(now).unwrap() else {
            panic!("expected the lock");
        };
        assert!(matches!(
            lock.acquire(now).unwrap(),
            LockAttempt::Contended { .. }
        ));
        assert_eq!(lock.holder(now).unwrap(), Some(guard.expires_at()));

        drop(guard);
        assert_eq!(lock.holder(now).unwrap(), None);
        assert!(matches!(lock.acquire(now).unwrap(), LockAttempt::Acquired(_)));
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let (store, lock) = lock();
        let now = Utc::now();
        store
            .update_marks(&mut |m| m.lock_expires_at = Some(now - Duration::seconds(1)))
            .unwrap();

        assert_eq!(lock.holder(now).unwrap(), None);
        let LockAttempt::Acquired(guard) = lock.acquire(now).unwrap() else {
            panic!("stale lock should be reclaimed");
        };
        assert_eq!(guard.expires_at(), now + Duration::seconds(300));
    }

    #[test]
    fn release_does_not_clear_a_successors_lock() {
        let (store, lock) = lock();
        let now = Utc::now();
        let LockAttempt::Acquired(old) = lock.acquire(now).unwrap() else {
            panic!("expected the lock");
        };

        // The old holder overran its horizon and someone else took over.
        let later = now + Duration::seconds(301);
        let LockAttempt::Acquired(successor) = lock.acquire(later).unwrap() else {
            panic!("expired lock should be reclaimable");
        };
        old.release().unwrap();
        assert_eq!(
            store.marks().unwrap().lock_expires_at,
            Some(successor.expires_at())
        );
    }

    #[test]
    fn unbounded_horizon_clamps_to_max_instant() {
        let store = Arc::new(MemoryStore::new());
        let lock = ProcessingLock::new(store, Duration::MAX);
        let now = Utc::now();
        let LockAttempt::Acquired(guard) = lock.acquire(now).unwrap() else {
            panic!("expected the lock");
        };
        assert_eq!(guard.expires_at(), DateTime::<Utc>::MAX_UTC);
        drop(guard);
        assert_eq!(lock.holder(now).unwrap(), None);
    }

    #[test]
    fn one_winner_across_stores_on_one_dir() {
        use std::sync::Barrier;
        use std::thread;

        use crate::store::FileStore;

        const ROUNDS: usize = 50;
        let dir = tempfile::tempdir().unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let contenders: Vec<_> = (0..2)
            .map(|_| {
                let path = dir.path().to_path_buf();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let store: Arc<dyn StateStore> = Arc::new(FileStore::open(&path).unwrap());
                    let lock = ProcessingLock::new(store, Duration::seconds(300));
                    let mut wins = Vec::with_capacity(ROUNDS);
                    for _ in 0..ROUNDS {
                        barrier.wait();
                        let attempt = lock.acquire(Utc::now()).unwrap();
                        barrier.wait();
                        wins.push(matches!(attempt, LockAttempt::Acquired(_)));
                        drop(attempt);
                        barrier.wait();
                    }
                    wins
                })
            })
            .collect();

        let results: Vec<Vec<bool>> = contenders.into_iter().map(|h| h.join().unwrap()).collect();
        for round in 0..ROUNDS {
            let winners = results.iter().filter(|wins| wins[round]).count();
            assert_eq!(winners, 1, "round {round} had {winners} winners");
        }
    }
}
