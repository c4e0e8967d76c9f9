//! DispatchLoop - the engine's single driver task.
//!
//! Each turn, under the state lock:
//! 1. purge expired finished tasks, promote retries whose backoff is over
//! 2. exit once shutdown has begun and nothing is pending or running
//! 3. otherwise admit the FIFO front if not paused, the breaker admits, and a
//!    slot is free, and spawn its attempt
//!
//! When nothing can start the loop idles until woken (submission, finished
//! attempt, resume, shutdown) or until the next deadline (retry eligibility,
//! breaker cool-down). It never polls.
//!
//! An attempt task runs the action without the lock, then applies the
//! outcome in one critical section: breaker verdict, then complete / retry /
//! fail on the task table. The slot is released after that.

use std::future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, Instant};

use super::engine::{EngineState, Shared};
use super::status::Lifecycle;
use crate::domain::{Action, ActionError, Decision, TaskId};
use crate::resilience::{Admission, Permit};

/// Everything an attempt task needs; built under the lock.
struct StartedAttempt<T> {
    id: TaskId,
    attempt: u32,
    probe: bool,
    action: Arc<dyn Action<T>>,
    permit: Permit,
}

enum Step<T> {
    Start(StartedAttempt<T>),
    /// Nothing can start now; wait for a wake-up or the deadline.
    Idle(Option<Instant>),
    Exit,
}

pub(crate) async fn run<T: Send + 'static>(shared: Arc<Shared<T>>) {
    let mut attempts = JoinSet::new();
    tracing::debug!("dispatch loop started");

    loop {
        while let Some(joined) = attempts.try_join_next() {
            on_attempt_joined(&shared, joined);
        }

        let step = {
            let mut state = shared.state.lock().await;
            next_step(&shared, &mut state)
        };

        match step {
            Step::Start(started) => {
                attempts.spawn(run_attempt(Arc::clone(&shared), started));
            }
            Step::Idle(deadline) => idle(&shared, &mut attempts, deadline).await,
            Step::Exit => break,
        }
    }

    // The table is idle, so these have already applied their outcomes.
    while let Some(joined) = attempts.join_next().await {
        on_attempt_joined(&shared, joined);
    }
    tracing::info!("dispatch loop stopped");
}

fn next_step<T>(shared: &Shared<T>, state: &mut EngineState<T>) -> Step<T> {
    let now = Instant::now();

    if shared.is_detached()
        && matches!(shared.lifecycle(), Lifecycle::Accepting | Lifecycle::Draining)
    {
        shared.cancel_pending(state, "scheduler dropped");
    }

    shared.purge_expired(state);
    let promoted = state.table.promote_due(now);
    if promoted > 0 {
        tracing::debug!(promoted, "retries eligible again");
    }

    if shared.lifecycle().is_closing() && state.table.is_idle() {
        return Step::Exit;
    }
    if state.paused {
        return Step::Idle(None);
    }
    if !state.table.has_ready() {
        return Step::Idle(state.table.next_eligible_at());
    }

    let admission = state.breaker.check(now);
    if let Admission::Reject { retry_at } = admission {
        return Step::Idle(retry_at);
    }
    let Some(permit) = shared.limiter.try_acquire() else {
        return Step::Idle(None);
    };

    let probe = state.breaker.admit(admission);
    let Some((id, attempt)) = state.table.start_next(probe, shared.clock.now()) else {
        panic!("ready queue emptied while the state lock was held");
    };
    let action = state
        .table
        .get(&id)
        .map(|record| record.action())
        .unwrap_or_else(|| panic!("{id}: started without a record"));
    state.attempts_started += 1;

    tracing::debug!(task_id = %id, attempt, probe, "dispatching task");
    Step::Start(StartedAttempt {
        id,
        attempt,
        probe,
        action,
        permit,
    })
}

async fn idle<T>(shared: &Shared<T>, attempts: &mut JoinSet<()>, deadline: Option<Instant>) {
    let sleep = async {
        match deadline {
            Some(deadline) => time::sleep_until(deadline).await,
            None => future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = shared.wake.notified() => {}
        _ = sleep => {}
        Some(joined) = attempts.join_next() => {
            on_attempt_joined(shared, joined);
        }
    }
}

/// A panicking attempt task means the engine's own bookkeeping failed; the
/// engine is aborted and the panic carried on to the driver's joiner.
fn on_attempt_joined<T>(shared: &Shared<T>, joined: Result<(), JoinError>) {
    match joined {
        Ok(()) => {}
        Err(err) if err.is_panic() => {
            shared.abort();
            panic::resume_unwind(err.into_panic());
        }
        Err(err) => tracing::warn!(error = %err, "attempt task cancelled"),
    }
}

async fn run_attempt<T: Send + 'static>(shared: Arc<Shared<T>>, started: StartedAttempt<T>) {
    let StartedAttempt {
        id,
        attempt,
        probe,
        action,
        permit,
    } = started;

    let outcome = AssertUnwindSafe(action.run())
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(ActionError::from_panic(payload)));

    {
        let mut state = shared.state.lock().await;
        apply_outcome(&shared, &mut state, id, attempt, probe, outcome);
    }

    shared.limiter.release(permit);
    shared.wake.notify_one();
}

fn apply_outcome<T>(
    shared: &Shared<T>,
    state: &mut EngineState<T>,
    id: TaskId,
    attempt: u32,
    probe: bool,
    outcome: Result<T, ActionError>,
) {
    let now = Instant::now();
    let at = shared.clock.now();

    let error = match outcome {
        Ok(value) => {
            state.breaker.record_success(probe);
            state.table.complete(id, value, at, now);
            tracing::debug!(task_id = %id, attempt, "task completed");
            return;
        }
        Err(error) => error,
    };

    state.breaker.record_failure(probe, now);
    match shared.decider.decide(attempt, &error) {
        Decision::Retry { .. } if shared.lifecycle() == Lifecycle::Cancelling => {
            tracing::warn!(
                task_id = %id,
                attempt,
                %error,
                "attempt failed, retry cancelled by shutdown"
            );
            let cancelled =
                ActionError::cancelled(format!("retry cancelled by shutdown: {error}"));
            state.table.fail(id, cancelled, at, now);
        }
        Decision::Retry { delay, reason } => {
            tracing::warn!(
                task_id = %id,
                attempt,
                ?delay,
                %error,
                %reason,
                "attempt failed, retry scheduled"
            );
            state.table.schedule_retry(id, error, now + delay, at);
            state.retries_scheduled += 1;
        }
        Decision::Fail { reason } => {
            tracing::warn!(task_id = %id, attempt, %error, %reason, "task failed");
            state.table.fail(id, error, at, now);
        }
    }
}
