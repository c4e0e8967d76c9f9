//! Task state machine.

use serde::{Deserialize, Serialize};

/// Task status.
///
/// State transitions:
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Pending (failed attempt, retry scheduled after backoff)
/// - Pending -> Running -> Failed (retries exhausted or error not retryable)
/// - Pending -> Failed (cancelled by shutdown before it ever ran again)
///
/// Completed and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a slot, for the breaker, or for its retry backoff to elapse.
    Pending,

    /// An attempt is executing.
    Running,

    /// The action returned a result.
    Completed,

    /// Gave up on the task.
    Failed,
}

impl TaskStatus {
    /// Is this a terminal status (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Pending)
                | (Running, Failed)
        )
    }
}
