//! Batch and task lifecycle state machines.
//!
//! Transition legality is encoded as pure functions over `(state, event)`;
//! persistence of the resulting state is the store's job, and the single
//! writers are fixed: the dispatcher owns task transitions out of `running`,
//! the coordinator owns batch transitions.

pub mod events;
pub mod states;
pub mod transitions;

pub use events::{BatchEvent, TaskEvent};
pub use states::{BatchState, TaskState};
pub use transitions::{batch_target_state, task_target_state};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateMachineError {
    #[error("invalid transition from '{from}' on event '{event}'")]
    InvalidTransition { from: String, event: String },

    #[error("state '{0}' is terminal")]
    Terminal(String),

    #[error("internal state machine error: {0}")]
    Internal(String),
}
