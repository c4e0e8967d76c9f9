//! Status - per-task and aggregate views.
//!
//! Views are snapshots taken under the engine lock; they never borrow engine
//! state, so callers may keep them around or serialize them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::domain::{ActionError, AttemptRecord, TaskId, TaskStatus};
use crate::queue::TaskRecord;
use crate::resilience::BreakerSnapshot;

/// Engine lifecycle.
///
/// ```text
/// Accepting -> Draining   (shutdown(true))
/// Accepting -> Cancelling (shutdown(false) or drop)
/// Draining  -> Cancelling (shutdown(false) while draining)
/// *         -> Aborted    (bookkeeping defect)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Accepting,
    Draining,
    Cancelling,
    Aborted,
}

impl Lifecycle {
    pub fn is_accepting(self) -> bool {
        self == Lifecycle::Accepting
    }

    /// Shutdown has begun; the dispatch loop exits once the table is idle.
    pub fn is_closing(self) -> bool {
        matches!(self, Lifecycle::Draining | Lifecycle::Cancelling)
    }
}

/// Snapshot of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView<T> {
    pub id: TaskId,
    pub status: TaskStatus,
    pub attempts: u32,
    pub result: Option<T>,
    pub error: Option<ActionError>,

    /// Monotonic, so not serialized; see `history` for wall-clock times.
    #[serde(skip)]
    pub next_eligible_at: Option<Instant>,

    pub history: Vec<AttemptRecord>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<T: Clone> TaskView<T> {
    pub(crate) fn of(record: &TaskRecord<T>) -> Self {
        Self {
            id: record.id,
            status: record.status,
            attempts: record.attempts,
            result: record.result.clone(),
            error: record.error.clone(),
            next_eligible_at: record.next_eligible_at,
            history: record.history.clone(),
            submitted_at: record.submitted_at,
            updated_at: record.updated_at,
        }
    }
}

impl<T> TaskView<T> {
    /// Build a view by moving the result out of a removed record.
    pub(crate) fn from_record(record: TaskRecord<T>) -> Self {
        Self {
            id: record.id,
            status: record.status,
            attempts: record.attempts,
            result: record.result,
            error: record.error,
            next_eligible_at: record.next_eligible_at,
            history: record.history,
            submitted_at: record.submitted_at,
            updated_at: record.updated_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Aggregate counts, for dashboards and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetrics {
    /// Pending and eligible now.
    pub ready: usize,
    /// Pending, waiting out a retry backoff.
    pub backing_off: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,

    pub in_use: usize,
    pub capacity: usize,

    pub breaker: BreakerSnapshot,
    pub paused: bool,
    pub lifecycle: Lifecycle,

    /// Lifetime counters; unaffected by take() or retention.
    pub submitted: u64,
    pub attempts_started: u64,
    pub retries_scheduled: u64,
}

impl EngineMetrics {
    pub fn pending(&self) -> usize {
        self.ready + self.backing_off
    }

    /// Tasks not yet terminal.
    pub fn in_flight(&self) -> usize {
        self.pending() + self.running
    }
}
