//! IdGenerator port - task id generation.
//!
//! # Implementations
//! - **UlidGenerator**: ULID based, time part taken from a [`Clock`]

use std::fmt;

use ulid::Ulid;

use crate::domain::TaskId;
use crate::ports::Clock;

/// IdGenerator hands out task ids.
///
/// Ids only need to be unique within one engine; FIFO order is kept by the
/// ready queue, not by id order.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    fn generate_task_id(&self) -> TaskId;
}

/// ULID based generator.
///
/// The timestamp part comes from the clock, so a [`crate::ports::FixedClock`]
/// gives ids with a deterministic time part (the random part still differs).
#[derive(Debug)]
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        TaskId::from(ulid)
    }
}
