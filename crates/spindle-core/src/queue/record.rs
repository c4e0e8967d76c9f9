//! Task record: action + execution state.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::domain::{Action, ActionError, AttemptRecord, TaskId, TaskStatus};

/// Action + execution state for one submitted task.
///
/// Design:
/// - This is the single source of truth for a task's state.
/// - The task table's collections hold TaskIds only.
/// - All state transitions happen here, through methods; an illegal
///   transition is a bookkeeping defect and panics.
pub struct TaskRecord<T> {
    pub id: TaskId,
    action: Arc<dyn Action<T>>,
    pub status: TaskStatus,

    /// Number of attempts started (including the current one if Running).
    pub attempts: u32,

    /// Set only when Completed.
    pub result: Option<T>,

    /// Most recent failure; set while waiting for a retry and when Failed.
    pub error: Option<ActionError>,

    /// Not eligible for dispatch before this instant (retry backoff).
    pub next_eligible_at: Option<Instant>,

    pub history: Vec<AttemptRecord>,

    /// Wall-clock timestamps for observability.
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Monotonic instant the task became terminal (drives retention).
    pub finished_at: Option<Instant>,

    status_tx: watch::Sender<TaskStatus>,
}

impl<T> TaskRecord<T> {
    pub fn new(id: TaskId, action: Arc<dyn Action<T>>, submitted_at: DateTime<Utc>) -> Self {
        let (status_tx, _) = watch::channel(TaskStatus::Pending);
        Self {
            id,
            action,
            status: TaskStatus::Pending,
            attempts: 0,
            result: None,
            error: None,
            next_eligible_at: None,
            history: Vec::new(),
            submitted_at,
            updated_at: submitted_at,
            finished_at: None,
            status_tx,
        }
    }

    pub fn action(&self) -> Arc<dyn Action<T>> {
        Arc::clone(&self.action)
    }

    /// Receiver that observes every status change of this task.
    pub fn subscribe(&self) -> watch::Receiver<TaskStatus> {
        self.status_tx.subscribe()
    }

    /// Is anyone still holding a receiver from [`subscribe`](Self::subscribe)?
    pub fn is_watched(&self) -> bool {
        self.status_tx.receiver_count() > 0
    }

    /// Pending -> Running (increments attempts).
    pub fn start_attempt(&mut self, probe: bool, at: DateTime<Utc>) -> u32 {
        self.transition(TaskStatus::Running, at);
        self.attempts += 1;
        self.error = None;
        self.next_eligible_at = None;
        self.history
            .push(AttemptRecord::started(self.attempts, probe, at));
        self.attempts
    }

    /// Running -> Completed.
    pub fn mark_completed(&mut self, result: T, at: DateTime<Utc>, now: Instant) {
        self.finish_current_attempt(at, None);
        self.transition(TaskStatus::Completed, at);
        self.result = Some(result);
        self.error = None;
        self.finished_at = Some(now);
    }

    /// Running -> Pending, eligible again at `next_eligible_at`.
    pub fn schedule_retry(&mut self, error: ActionError, next_eligible_at: Instant, at: DateTime<Utc>) {
        self.finish_current_attempt(at, Some(error.clone()));
        self.transition(TaskStatus::Pending, at);
        self.error = Some(error);
        self.next_eligible_at = Some(next_eligible_at);
    }

    /// Running -> Failed.
    pub fn mark_failed(&mut self, error: ActionError, at: DateTime<Utc>, now: Instant) {
        self.finish_current_attempt(at, Some(error.clone()));
        self.transition(TaskStatus::Failed, at);
        self.error = Some(error);
        self.finished_at = Some(now);
    }

    /// Pending -> Failed, without running again.
    pub fn cancel(&mut self, error: ActionError, at: DateTime<Utc>, now: Instant) {
        self.transition(TaskStatus::Failed, at);
        self.error = Some(error);
        self.next_eligible_at = None;
        self.finished_at = Some(now);
    }

    fn finish_current_attempt(&mut self, at: DateTime<Utc>, error: Option<ActionError>) {
        let current = self
            .history
            .last_mut()
            .filter(|a| !a.is_finished())
            .unwrap_or_else(|| panic!("{}: no attempt in flight to finish", self.id));
        current.finish(at, error);
    }

    fn transition(&mut self, next: TaskStatus, at: DateTime<Utc>) {
        assert!(
            self.status.can_transition_to(next),
            "{}: illegal transition {:?} -> {:?}",
            self.id,
            self.status,
            next
        );
        self.status = next;
        self.updated_at = at;
        self.status_tx.send_replace(next);
    }
}

impl<T> fmt::Debug for TaskRecord<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("attempts", &self.attempts)
            .field("error", &self.error)
            .field("next_eligible_at", &self.next_eligible_at)
            .finish_non_exhaustive()
    }
}
