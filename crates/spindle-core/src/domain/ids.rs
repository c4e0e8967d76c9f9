//! Task identifiers.
//!
//! Ids are ULIDs (Universally Unique Lexicographically Sortable Identifier):
//! - sortable by creation time (the timestamp is the high 48 bits)
//! - generated without coordination
//! - 128-bit, same size as a UUID
//!
//! Ids are produced by [`crate::ports::IdGenerator`] so tests can pin the
//! timestamp part through a fixed clock.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier of a Task, assigned at submission and never changed.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Ulid);

impl TaskId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}
