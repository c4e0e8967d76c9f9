//! spindle-core
//!
//! An in-memory, bounded-concurrency task execution engine.
//!
//! Submitted actions run at most `concurrency` at a time in FIFO order.
//! Retryable failures are retried with exponential backoff, and a circuit
//! breaker stops dispatch after a run of consecutive failures.
//!
//! # Modules
//! - **domain**: task ids, status, actions, action errors, attempt history, retry decisions
//! - **queue**: task records, the task table, retry policies
//! - **resilience**: circuit breaker, concurrency limiter
//! - **ports**: clock and id generation
//! - **app**: configuration, builder, scheduler, dispatch loop, status views
//! - **error**: errors returned by the scheduler API

pub mod app;
pub mod domain;
pub mod error;
pub mod ports;
pub mod queue;
pub mod resilience;

pub use app::{
    BuildError, ConfigError, EngineConfig, EngineMetrics, Lifecycle, Scheduler, SchedulerBuilder,
    TaskView,
};
pub use domain::{Action, ActionError, ErrorKind, TaskId, TaskStatus};
pub use error::EngineError;
