//! Engine state shared by the scheduler handle, the dispatch loop and the
//! attempt tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify, watch};
use tokio::time::Instant;

use super::config::EngineConfig;
use super::status::{EngineMetrics, Lifecycle};
use crate::domain::Decider;
use crate::error::EngineError;
use crate::ports::{Clock, IdGenerator};
use crate::queue::TaskTable;
use crate::resilience::{CircuitBreaker, ConcurrencyLimiter};

/// Everything mutated by a task transition. Guarded by one lock so each
/// transition (table + breaker + counters) is a single critical section.
pub(crate) struct EngineState<T> {
    pub table: TaskTable<T>,
    pub breaker: CircuitBreaker,
    pub paused: bool,

    pub submitted: u64,
    pub attempts_started: u64,
    pub retries_scheduled: u64,
}

impl<T> EngineState<T> {
    fn new(breaker: CircuitBreaker, retention: bool) -> Self {
        let table = if retention {
            TaskTable::with_retention()
        } else {
            TaskTable::new()
        };
        Self {
            table,
            breaker,
            paused: false,
            submitted: 0,
            attempts_started: 0,
            retries_scheduled: 0,
        }
    }
}

pub(crate) struct Shared<T> {
    pub state: Mutex<EngineState<T>>,

    /// Wakes the dispatch loop: submission, slot release, resume, shutdown.
    pub wake: Notify,

    /// Written only while `state` is locked, except when aborting.
    lifecycle: watch::Sender<Lifecycle>,

    /// Set when the scheduler handle is dropped without a shutdown.
    detached: AtomicBool,

    pub limiter: ConcurrencyLimiter,
    pub decider: Decider,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub config: EngineConfig,
}

impl<T> Shared<T> {
    pub fn new(
        config: EngineConfig,
        decider: Decider,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle::Accepting);
        Self {
            state: Mutex::new(EngineState::new(
                CircuitBreaker::new(config.breaker_config()),
                config.retention().is_some(),
            )),
            wake: Notify::new(),
            lifecycle,
            detached: AtomicBool::new(false),
            limiter: ConcurrencyLimiter::new(config.concurrency),
            decider,
            clock,
            ids,
            config,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    pub fn subscribe_lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    /// Caller must hold the state lock.
    pub fn set_lifecycle(&self, next: Lifecycle) {
        let previous = self.lifecycle.send_replace(next);
        if previous != next {
            tracing::info!(from = ?previous, to = ?next, "engine lifecycle changed");
        }
    }

    /// Mark the engine unusable after a bookkeeping defect.
    pub fn abort(&self) {
        self.lifecycle.send_replace(Lifecycle::Aborted);
        tracing::error!("engine aborted: task bookkeeping is no longer consistent");
    }

    /// Err unless the engine is still alive.
    pub fn ensure_alive(&self) -> Result<(), EngineError> {
        match self.lifecycle() {
            Lifecycle::Aborted => Err(EngineError::Aborted),
            _ => Ok(()),
        }
    }

    /// Err unless new tasks may be submitted.
    pub fn ensure_accepting(&self) -> Result<(), EngineError> {
        match self.lifecycle() {
            Lifecycle::Accepting => Ok(()),
            Lifecycle::Aborted => Err(EngineError::Aborted),
            Lifecycle::Draining | Lifecycle::Cancelling => Err(EngineError::EngineClosed),
        }
    }

    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Stop accepting and fail every pending task. Running tasks finish;
    /// their retries are cancelled when they come back.
    pub fn cancel_pending(&self, state: &mut EngineState<T>, reason: &str) {
        self.set_lifecycle(Lifecycle::Cancelling);
        let cancelled = state
            .table
            .cancel_pending(reason, self.clock.now(), Instant::now());
        for id in &cancelled {
            tracing::debug!(task_id = %id, reason, "pending task cancelled");
        }
        if !cancelled.is_empty() {
            tracing::info!(cancelled = cancelled.len(), reason, "cancelled pending tasks");
        }
    }

    /// Drop finished tasks older than the retention window.
    pub fn purge_expired(&self, state: &mut EngineState<T>) {
        let Some(retention) = self.config.retention() else {
            return;
        };
        let purged = state.table.purge_finished(Instant::now(), retention);
        if purged > 0 {
            tracing::debug!(purged, "purged finished tasks past retention");
        }
    }

    pub fn metrics(&self, state: &EngineState<T>) -> EngineMetrics {
        let counts = state.table.counts();
        EngineMetrics {
            ready: counts.ready,
            backing_off: counts.backing_off,
            running: counts.running,
            completed: counts.completed,
            failed: counts.failed,
            in_use: self.limiter.in_use(),
            capacity: self.limiter.capacity(),
            breaker: state.breaker.snapshot(),
            paused: state.paused,
            lifecycle: self.lifecycle(),
            submitted: state.submitted,
            attempts_started: state.attempts_started,
            retries_scheduled: state.retries_scheduled,
        }
    }
}
