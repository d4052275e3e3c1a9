//! One-shot trigger registration for the next tick.
//!
//! The trigger is armed by writing `next_run_at` into the scheduler marks, so
//! the long-running runner and one-off CLI invocations share one arming.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::store::{StateStore, StoreError};

pub trait Trigger: Send + Sync {
    /// Arms the trigger to fire `delay` after `now`, replacing any arming.
    fn schedule_once(&self, delay: Duration, now: DateTime<Utc>) -> Result<(), StoreError>;

    fn is_scheduled(&self) -> Result<bool, StoreError> {
        Ok(self.next_due()?.is_some())
    }

    fn clear_scheduled(&self) -> Result<(), StoreError>;

    fn next_due(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Disarms and returns `true` if the trigger is due at `now`.
    fn take_due(&self, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Arms the trigger only if it is not armed already. Returns whether it
    /// armed.
    fn arm_if_idle(&self, delay: Duration, now: DateTime<Utc>) -> Result<bool, StoreError> {
        if self.is_scheduled()? {
            return Ok(false);
        }
        self.schedule_once(delay, now)?;
        Ok(true)
    }
}

/// `now + span`, clamped to the latest representable instant.
pub(crate) fn saturating_after(now: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    now.checked_add_signed(span)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// [`Trigger`] stored in the scheduler marks.
pub struct MarksTrigger {
    store: Arc<dyn StateStore>,
}

impl MarksTrigger {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

impl Trigger for MarksTrigger {
    fn schedule_once(&self, delay: Duration, now: DateTime<Utc>) -> Result<(), StoreError> {
        let due = saturating_after(now, delay);
        self.store.update_marks(&mut |marks| marks.next_run_at = Some(due))?;
        debug!(%due, "tick scheduled");
        Ok(())
    }

    fn clear_scheduled(&self) -> Result<(), StoreError> {
        self.store.update_marks(&mut |marks| marks.next_run_at = None)?;
        Ok(())
    }

    fn next_due(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.store.marks()?.next_run_at)
    }

    fn take_due(&self, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut fired = false;
        self.store.update_marks(&mut |marks| {
            fired = marks.next_run_at.is_some_and(|due| due <= now);
            if fired {
                marks.next_run_at = None;
            }
        })?;
        Ok(fired)
    }

    // Check and arm under one marks update.
    fn arm_if_idle(&self, delay: Duration, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let due = saturating_after(now, delay);
        let mut armed = false;
        self.store.update_marks(&mut |marks| {
            armed = marks.next_run_at.is_none();
            if armed {
                marks.next_run_at = Some(due);
            }
        })?;
        if armed {
            debug!(%due, "tick scheduled");
        }
        Ok(armed)
    }
}
