//! Scheduler - the engine's public handle.

use std::fmt;
use std::panic;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::builder::SchedulerBuilder;
use super::config::EngineConfig;
use super::engine::Shared;
use super::status::{EngineMetrics, Lifecycle, TaskView};
use crate::domain::{Action, TaskId};
use crate::error::EngineError;
use crate::queue::TaskRecord;

/// Bounded-concurrency task engine.
///
/// Tasks are admitted in submission order, at most `concurrency` at a time,
/// retried with backoff on retryable errors, and held back while the circuit
/// breaker is open. Results stay in the engine until [`take`](Self::take)n
/// or purged by the retention window.
///
/// # Example
/// ```ignore
/// let scheduler = Scheduler::<u32>::builder().concurrency(2).build()?;
/// let id = scheduler.submit(|| async { Ok(42) }).await?;
/// let view = scheduler.wait(id).await?;
/// assert_eq!(view.result, Some(42));
/// scheduler.shutdown(true).await;
/// ```
pub struct Scheduler<T> {
    shared: Arc<Shared<T>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone + Send + 'static> Scheduler<T> {
    pub fn builder() -> SchedulerBuilder<T> {
        SchedulerBuilder::new()
    }

    pub(crate) fn start(shared: Shared<T>, runtime: &tokio::runtime::Handle) -> Self {
        let shared = Arc::new(shared);
        let driver = runtime.spawn(super::dispatch_loop::run(Arc::clone(&shared)));
        Self {
            shared,
            driver: Mutex::new(Some(driver)),
        }
    }

    /// Enqueue an action as a new Pending task. Returns without waiting for
    /// it to run.
    pub async fn submit<A>(&self, action: A) -> Result<TaskId, EngineError>
    where
        A: Action<T> + 'static,
    {
        let action: Arc<dyn Action<T>> = Arc::new(action);
        let id = {
            let mut state = self.shared.state.lock().await;
            self.shared.ensure_accepting()?;
            let id = self.shared.ids.generate_task_id();
            state
                .table
                .insert(TaskRecord::new(id, action, self.shared.clock.now()));
            state.submitted += 1;
            id
        };
        tracing::debug!(task_id = %id, "task submitted");
        self.shared.wake.notify_one();
        Ok(id)
    }

    /// Snapshot of a task.
    pub async fn status(&self, id: TaskId) -> Result<TaskView<T>, EngineError> {
        let mut state = self.shared.state.lock().await;
        self.shared.ensure_alive()?;
        self.shared.purge_expired(&mut state);
        state
            .table
            .get(&id)
            .map(TaskView::of)
            .ok_or(EngineError::UnknownTask(id))
    }

    /// Wait until a task is Completed or Failed, then return its snapshot.
    pub async fn wait(&self, id: TaskId) -> Result<TaskView<T>, EngineError> {
        let mut status = {
            let state = self.shared.state.lock().await;
            self.shared.ensure_alive()?;
            state
                .table
                .get(&id)
                .map(TaskRecord::subscribe)
                .ok_or(EngineError::UnknownTask(id))?
        };
        let mut lifecycle = self.shared.subscribe_lifecycle();

        let terminal = async { status.wait_for(|s| s.is_terminal()).await.is_ok() };
        let aborted = async {
            lifecycle
                .wait_for(|l| *l == Lifecycle::Aborted)
                .await
                .is_ok()
        };

        tokio::select! {
            _ = terminal => {}
            true = aborted => return Err(EngineError::Aborted),
        }

        // `status` is still held, so retention has not purged the record.
        let state = self.shared.state.lock().await;
        self.shared.ensure_alive()?;
        state
            .table
            .get(&id)
            .map(TaskView::of)
            .ok_or(EngineError::UnknownTask(id))
    }

    /// Remove a finished task and hand back its final snapshot.
    pub async fn take(&self, id: TaskId) -> Result<TaskView<T>, EngineError> {
        let mut state = self.shared.state.lock().await;
        self.shared.ensure_alive()?;
        self.shared.purge_expired(&mut state);

        let finished = state
            .table
            .get(&id)
            .map(|record| record.status.is_terminal())
            .ok_or(EngineError::UnknownTask(id))?;
        if !finished {
            return Err(EngineError::TaskNotFinished(id));
        }
        state
            .table
            .remove_terminal(&id)
            .map(TaskView::from_record)
            .ok_or(EngineError::UnknownTask(id))
    }

    /// Stop starting new attempts; running ones carry on. Ignored once
    /// shutdown has begun.
    pub async fn pause(&self) {
        let mut state = self.shared.state.lock().await;
        if self.shared.lifecycle().is_closing() {
            tracing::debug!("pause ignored, engine is shutting down");
            return;
        }
        if !state.paused {
            state.paused = true;
            tracing::info!("scheduler paused");
        }
    }

    pub async fn resume(&self) {
        {
            let mut state = self.shared.state.lock().await;
            if !state.paused {
                return;
            }
            state.paused = false;
            tracing::info!("scheduler resumed");
        }
        self.shared.wake.notify_one();
    }

    /// Refuse new submissions, then:
    /// - `drain = true`: finish all accepted work (retries included) and
    ///   wait for the dispatch loop to stop. A paused engine is resumed.
    /// - `drain = false`: fail every pending task as cancelled and return
    ///   at once. Running attempts finish but are not retried.
    ///
    /// If the engine aborted, `shutdown(true)` re-raises the panic that
    /// aborted it.
    pub async fn shutdown(&self, drain: bool) {
        {
            let mut state = self.shared.state.lock().await;
            match (self.shared.lifecycle(), drain) {
                (Lifecycle::Aborted, _) | (Lifecycle::Cancelling, _) => {}
                (Lifecycle::Accepting, true) => {
                    self.shared.set_lifecycle(Lifecycle::Draining);
                    state.paused = false;
                }
                (Lifecycle::Draining, true) => {}
                (Lifecycle::Accepting | Lifecycle::Draining, false) => {
                    self.shared.cancel_pending(&mut state, "scheduler shut down");
                }
            }
        }
        self.shared.wake.notify_one();

        if drain {
            self.join_driver().await;
        }
    }

    pub async fn metrics(&self) -> EngineMetrics {
        let mut state = self.shared.state.lock().await;
        self.shared.purge_expired(&mut state);
        self.shared.metrics(&state)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    async fn join_driver(&self) {
        // Held across the await so a second caller waits for the same exit.
        let mut driver = self.driver.lock().await;
        let Some(handle) = driver.take() else {
            return;
        };
        match handle.await {
            Ok(()) => {}
            Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
            Err(err) => tracing::warn!(error = %err, "dispatch loop cancelled"),
        }
    }
}

impl<T> Drop for Scheduler<T> {
    fn drop(&mut self) {
        self.shared.detach();
    }
}

impl<T> fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("lifecycle", &self.shared.lifecycle())
            .field("limiter", &self.shared.limiter)
            .finish_non_exhaustive()
    }
}
