//! App - the engine itself.
//!
//! Wires the queue, resilience and ports layers into a running scheduler.
//!
//! # Components
//! - **SchedulerBuilder**: configuration, validation and wiring
//! - **Scheduler**: public handle (submit / status / wait / take / pause / shutdown)
//! - **dispatch_loop**: the driver task (promote -> admit -> spawn -> apply outcome)
//! - **status**: task and engine snapshots

pub mod builder;
pub mod config;
mod dispatch_loop;
mod engine;
pub mod scheduler;
pub mod status;

pub use self::builder::{BuildError, SchedulerBuilder};
pub use self::config::{ConfigError, EngineConfig};
pub use self::scheduler::Scheduler;
pub use self::status::{EngineMetrics, Lifecycle, TaskView};
