//! Clock port - wall-clock time.
//!
//! Wall-clock time is only used for timestamps shown to callers (submission,
//! attempt start/finish) and for the time part of task ids. Scheduling
//! deadlines use `tokio::time::Instant`, which tests can pause.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Clock provides the current wall-clock time.
///
/// Behind a trait so tests can swap in [`FixedClock`].
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    at: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.at
    }
}
