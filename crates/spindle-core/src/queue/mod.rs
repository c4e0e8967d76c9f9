//! Queue module: task records, the in-memory task table and retry policy.

mod record;
mod retry;
mod table;

pub use record::TaskRecord;
pub use retry::{ExponentialBackoff, RetryPolicy};
pub use table::{TableCounts, TaskTable};
