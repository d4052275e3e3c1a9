use chrono::{DateTime, Utc};
use thiserror::Error;

use super::item::{ItemState, ItemStatus};
use crate::artifacts::ArtifactId;

/// Something that happened to a work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemEvent {
    /// The driver picked the item up.
    Begin,
    /// The pipeline published at least one artifact.
    Succeed { artifact_ids: Vec<ArtifactId> },
    /// The attempt failed terminally.
    Fail { message: String },
    /// An operator asked for another attempt.
    Retry,
}

impl ItemEvent {
    fn name(&self) -> &'static str {
        match self {
            ItemEvent::Begin => "begin",
            ItemEvent::Succeed { .. } => "succeed",
            ItemEvent::Fail { .. } => "fail",
            ItemEvent::Retry => "retry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {event} an item that is {from}")]
pub struct TransitionRejected {
    pub from: ItemStatus,
    pub event: &'static str,
}

/// Applies item events, enforcing the lifecycle rules.
pub struct ItemMachine;

impl ItemMachine {
    /// Computes and applies the transition for `event`, returning the new status.
    ///
    /// - `Begin` is accepted from anything but `completed` (a `processing`
    ///   item left behind by a crashed tick may be picked up again).
    /// - `Succeed` requires `processing`; it clears the failure fields but
    ///   keeps `fail_count`.
    /// - `Fail` is accepted from anything but `completed` and increments
    ///   `fail_count`.
    /// - `Retry` requires `failed` and moves the item back to `pending`.
    pub fn apply(
        state: &mut ItemState,
        event: ItemEvent,
        now: DateTime<Utc>,
    ) -> Result<ItemStatus, TransitionRejected> {
        let allowed = match (&event, state.status) {
            (_, ItemStatus::Completed) => false,
            (ItemEvent::Begin, _) | (ItemEvent::Fail { .. }, _) => true,
            (ItemEvent::Succeed { .. }, from) => from == ItemStatus::Processing,
            (ItemEvent::Retry, from) => from == ItemStatus::Failed,
        };
        if !allowed {
            return Err(TransitionRejected {
                from: state.status,
                event: event.name(),
            });
        }

        match event {
            ItemEvent::Begin => {
                state.status = ItemStatus::Processing;
                state.started_at = Some(now);
            }
            ItemEvent::Succeed { artifact_ids } => {
                state.status = ItemStatus::Completed;
                state.completed_at = Some(now);
                state.artifact_ids = artifact_ids;
                state.last_error = None;
                state.failed_at = None;
            }
            ItemEvent::Fail { message } => {
                state.status = ItemStatus::Failed;
                state.fail_count += 1;
                state.last_error = Some(message);
                state.failed_at = Some(now);
            }
            ItemEvent::Retry => {
                state.status = ItemStatus::Pending;
                state.last_error = None;
                state.failed_at = None;
            }
        }
        Ok(state.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail(message: &str) -> ItemEvent {
        ItemEvent::Fail {
            message: message.into(),
        }
    }

    #[test]
    fn happy_path_completes() {
        let mut state = ItemState::default();
        let now = Utc::now();
        assert_eq!(
            ItemMachine::apply(&mut state, ItemEvent::Begin, now),
            Ok(ItemStatus::Processing)
        );
        assert_eq!(state.started_at, Some(now));

        let done = ItemEvent::Succeed {
            artifact_ids: vec![4, 5],
        };
        assert_eq!(
            ItemMachine::apply(&mut state, done, now),
            Ok(ItemStatus::Completed)
        );
        assert_eq!(state.artifact_ids, vec![4, 5]);
    }

    #[test]
    fn failure_increments_count_and_retry_clears_fields() {
        let mut state = ItemState::default();
        let now = Utc::now();
        ItemMachine::apply(&mut state, ItemEvent::Begin, now).unwrap();
        ItemMachine::apply(&mut state, fail("timeout"), now).unwrap();
        assert_eq!(state.status, ItemStatus::Failed);
        assert_eq!(state.fail_count, 1);
        assert_eq!(state.last_error.as_deref(), Some("timeout"));

        ItemMachine::apply(&mut state, ItemEvent::Retry, now).unwrap();
        assert_eq!(state.status, ItemStatus::Pending);
        assert!(state.last_error.is_none());
        assert!(state.failed_at.is_none());
        assert_eq!(state.fail_count, 1);
    }

    #[test]
    fn success_after_failure_keeps_fail_count() {
        let mut state = ItemState::default();
        let now = Utc::now();
        ItemMachine::apply(&mut state, ItemEvent::Begin, now).unwrap();
        ItemMachine::apply(&mut state, fail("boom"), now).unwrap();
        ItemMachine::apply(&mut state, ItemEvent::Retry, now).unwrap();
        ItemMachine::apply(&mut state, ItemEvent::Begin, now).unwrap();
        ItemMachine::apply(
            &mut state,
            ItemEvent::Succeed {
                artifact_ids: vec![1],
            },
            now,
        )
        .unwrap();
        assert_eq!(state.fail_count, 1);
        assert!(state.last_error.is_none());
    }

    #[test]
    fn completed_is_terminal() {
        let mut state = ItemState {
            status: ItemStatus::Completed,
            ..Default::default()
        };
        let now = Utc::now();
        for event in [ItemEvent::Begin, fail("x"), ItemEvent::Retry] {
            let err = ItemMachine::apply(&mut state, event, now).unwrap_err();
            assert_eq!(err.from, ItemStatus::Completed);
        }
        assert_eq!(state.fail_count, 0);
    }

    #[test]
    fn retry_requires_failed() {
        let mut state = ItemState::default();
        let err = ItemMachine::apply(&mut state, ItemEvent::Retry, Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "cannot retry an item that is pending");
    }

    #[test]
    fn succeed_requires_processing() {
        let mut state = ItemState::default();
        let result = ItemMachine::apply(
            &mut state,
            ItemEvent::Succeed {
                artifact_ids: vec![],
            },
            Utc::now(),
        );
        assert!(result.is_err());
        assert_eq!(state.status, ItemStatus::Pending);
    }
}
