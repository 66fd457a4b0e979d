//! Transition legality for batches and tasks.

use super::events::{BatchEvent, TaskEvent};
use super::states::{BatchState, TaskState};
use super::StateMachineError;

/// Determine the target batch state for an event, or reject the transition.
pub fn batch_target_state(
    current: BatchState,
    event: &BatchEvent,
) -> Result<BatchState, StateMachineError> {
    let target = match (current, event) {
        (BatchState::Created, BatchEvent::Start) => BatchState::Running,
        (BatchState::Paused, BatchEvent::Start | BatchEvent::Resume) => BatchState::Running,

        (BatchState::Running, BatchEvent::Pause) => BatchState::Paused,

        // Cancellation is accepted from every non-terminal state.
        (
            BatchState::Created | BatchState::Running | BatchState::Paused | BatchState::Cancelling,
            BatchEvent::Cancel,
        ) => BatchState::Cancelling,

        (BatchState::Running | BatchState::Cancelling, BatchEvent::Complete) => {
            BatchState::Completed
        }

        (current, BatchEvent::Fail(_)) if !current.is_terminal() => BatchState::Failed,

        (from, event) => {
            return Err(StateMachineError::InvalidTransition {
                from: from.to_string(),
                event: event.name().to_string(),
            })
        }
    };
    Ok(target)
}

/// Determine the target task state for an event, or reject the transition.
pub fn task_target_state(
    current: TaskState,
    event: &TaskEvent,
) -> Result<TaskState, StateMachineError> {
    if current.is_terminal() {
        return Err(StateMachineError::Terminal(current.to_string()));
    }

    let target = match (current, event) {
        (TaskState::Pending, TaskEvent::Claim) => TaskState::Running,
        (TaskState::Running, TaskEvent::Succeed) => TaskState::Succeeded,
        (TaskState::Running, TaskEvent::Fail(_)) => TaskState::Failed,
        (TaskState::Running, TaskEvent::Requeue) => TaskState::Pending,
        (TaskState::Pending | TaskState::Running, TaskEvent::Cancel) => TaskState::Cancelled,

        (from, event) => {
            return Err(StateMachineError::InvalidTransition {
                from: from.to_string(),
                event: event.name().to_string(),
            })
        }
    };
    Ok(target)
}
