//! In-memory task table: records plus the four disjoint collections.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::TaskRecord;
use crate::domain::{ActionError, TaskId, TaskStatus};

/// Scheduled (backing-off) task entry for the retry heap.
///
/// Ordering is reversed so `BinaryHeap` acts as a min-heap (earliest first);
/// `seq` keeps equal deadlines in the order they were scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledTask {
    next_eligible_at: Instant,
    seq: u64,
    task_id: TaskId,
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .next_eligible_at
            .cmp(&self.next_eligible_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Counts per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub ready: usize,
    pub backing_off: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TableCounts {
    pub fn pending(&self) -> usize {
        self.ready + self.backing_off
    }
}

/// Task table.
///
/// Design:
/// - `records` is the single source of truth; collections hold TaskIds only.
/// - pending = `ready` (FIFO, eligible now) + `scheduled` (waiting on backoff).
/// - pending / running / completed / failed partition all retained ids; each
///   method below moves one id between them, and a failed move is a defect.
pub struct TaskTable<T> {
    records: HashMap<TaskId, TaskRecord<T>>,
    ready: VecDeque<TaskId>,
    scheduled: BinaryHeap<ScheduledTask>,
    running: HashSet<TaskId>,
    completed: HashSet<TaskId>,
    failed: HashSet<TaskId>,

    /// Terminal ids in the order they finished. Only kept when a retention
    /// window will purge them; a taken id stays until its window passes.
    finished: VecDeque<(Instant, TaskId)>,
    track_finished: bool,

    next_seq: u64,
}

impl<T> TaskTable<T> {
    /// A table whose terminal tasks stay until they are taken.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// A table that also remembers finish order for [`purge_finished`](Self::purge_finished).
    pub fn with_retention() -> Self {
        Self::build(true)
    }

    fn build(track_finished: bool) -> Self {
        Self {
            records: HashMap::new(),
            ready: VecDeque::new(),
            scheduled: BinaryHeap::new(),
            running: HashSet::new(),
            completed: HashSet::new(),
            failed: HashSet::new(),
            finished: VecDeque::new(),
            track_finished,
            next_seq: 0,
        }
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskRecord<T>> {
        self.records.get(id)
    }

    /// Add a new Pending task at the back of the FIFO.
    pub fn insert(&mut self, record: TaskRecord<T>) {
        let id = record.id;
        assert_eq!(record.status, TaskStatus::Pending, "{id}: inserted task must be pending");
        let previous = self.records.insert(id, record);
        assert!(previous.is_none(), "{id}: duplicate task id");
        self.ready.push_back(id);
    }

    /// Move backed-off tasks whose time has come to the back of the FIFO.
    pub fn promote_due(&mut self, now: Instant) -> usize {
        let mut promoted = 0;
        while let Some(entry) = self.scheduled.peek() {
            if entry.next_eligible_at > now {
                break; // Heap is sorted, so we can stop
            }
            if let Some(entry) = self.scheduled.pop() {
                self.ready.push_back(entry.task_id);
                promoted += 1;
            }
        }
        promoted
    }

    /// Earliest instant at which a backed-off task becomes eligible.
    pub fn next_eligible_at(&self) -> Option<Instant> {
        self.scheduled.peek().map(|entry| entry.next_eligible_at)
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Pop the FIFO front and move it to `running`.
    ///
    /// Returns the id and the attempt number just started.
    pub fn start_next(&mut self, probe: bool, at: DateTime<Utc>) -> Option<(TaskId, u32)> {
        let id = self.ready.pop_front()?;
        let record = self.record_mut(id);
        let attempt = record.start_attempt(probe, at);
        assert!(self.running.insert(id), "{id}: already running");
        Some((id, attempt))
    }

    /// Running -> Completed.
    pub fn complete(&mut self, id: TaskId, result: T, at: DateTime<Utc>, now: Instant) {
        self.leave_running(id);
        self.record_mut(id).mark_completed(result, at, now);
        self.completed.insert(id);
        self.mark_finished(now, id);
    }

    /// Running -> Pending (backing off until `next_eligible_at`).
    pub fn schedule_retry(
        &mut self,
        id: TaskId,
        error: ActionError,
        next_eligible_at: Instant,
        at: DateTime<Utc>,
    ) {
        self.leave_running(id);
        self.record_mut(id).schedule_retry(error, next_eligible_at, at);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.scheduled.push(ScheduledTask {
            next_eligible_at,
            seq,
            task_id: id,
        });
    }

    /// Running -> Failed.
    pub fn fail(&mut self, id: TaskId, error: ActionError, at: DateTime<Utc>, now: Instant) {
        self.leave_running(id);
        self.record_mut(id).mark_failed(error, at, now);
        self.failed.insert(id);
        self.mark_finished(now, id);
    }

    /// Pending -> Failed for every pending task. Returns the cancelled ids.
    pub fn cancel_pending(&mut self, reason: &str, at: DateTime<Utc>, now: Instant) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.ready.drain(..).collect();
        ids.extend(self.scheduled.drain().map(|entry| entry.task_id));
        for &id in &ids {
            self.record_mut(id)
                .cancel(ActionError::cancelled(reason), at, now);
            self.failed.insert(id);
            self.mark_finished(now, id);
        }
        ids
    }

    /// Remove a terminal task. Returns None if `id` is unknown or not terminal.
    pub fn remove_terminal(&mut self, id: &TaskId) -> Option<TaskRecord<T>> {
        if !self.records.get(id)?.status.is_terminal() {
            return None;
        }
        self.completed.remove(id);
        self.failed.remove(id);
        self.records.remove(id)
    }

    /// Drop terminal tasks that finished at least `retention` ago.
    ///
    /// A task someone is still waiting on stays until the waiter has read it.
    pub fn purge_finished(&mut self, now: Instant, retention: Duration) -> usize {
        let mut purged = 0;
        let mut watched = Vec::new();
        while let Some(&(finished_at, id)) = self.finished.front() {
            if now.saturating_duration_since(finished_at) < retention {
                break;
            }
            self.finished.pop_front();
            // Already gone if the caller took it.
            let Some(is_watched) = self.records.get(&id).map(TaskRecord::is_watched) else {
                continue;
            };
            if is_watched {
                watched.push((finished_at, id));
            } else if self.remove_terminal(&id).is_some() {
                purged += 1;
            }
        }
        for entry in watched.into_iter().rev() {
            self.finished.push_front(entry);
        }
        purged
    }

    pub fn counts(&self) -> TableCounts {
        TableCounts {
            ready: self.ready.len(),
            backing_off: self.scheduled.len(),
            running: self.running.len(),
            completed: self.completed.len(),
            failed: self.failed.len(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.scheduled.is_empty() && self.running.is_empty()
    }

    fn mark_finished(&mut self, now: Instant, id: TaskId) {
        if self.track_finished {
            self.finished.push_back((now, id));
        }
    }

    fn leave_running(&mut self, id: TaskId) {
        assert!(self.running.remove(&id), "{id}: not in the running set");
    }

    fn record_mut(&mut self, id: TaskId) -> &mut TaskRecord<T> {
        self.records
            .get_mut(&id)
            .unwrap_or_else(|| panic!("{id}: tracked in a collection but has no record"))
    }
}

impl<T> Default for TaskTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
