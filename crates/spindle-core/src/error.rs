use thiserror::Error;

use crate::domain::TaskId;

/// Errors returned synchronously by the engine's API.
///
/// Action failures are not here: they are recorded on their task and seen
/// through `status()` / `wait()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine is shut down and no longer accepts tasks")]
    EngineClosed,

    #[error("unknown task {0} (never submitted, taken, or purged)")]
    UnknownTask(TaskId),

    #[error("task {0} has not finished yet")]
    TaskNotFinished(TaskId),

    #[error("engine aborted after an internal bookkeeping failure")]
    Aborted,
}
