mod item;
mod transition;

pub use item::{FailedItem, ItemState, ItemStates, ItemStatus};
pub use transition::{ItemEvent, ItemMachine, TransitionRejected};
