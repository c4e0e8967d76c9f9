//! Attempt history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ActionError;

/// A single execution attempt of a task.
///
/// Records when the attempt ran and how it ended, so a caller can explain
/// why a task took as long as it did (backoff gaps, breaker probes, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,

    /// Whether the circuit breaker admitted this attempt as its half-open probe.
    pub probe: bool,

    pub started_at: DateTime<Utc>,

    /// None while the attempt is still running.
    pub finished_at: Option<DateTime<Utc>>,

    /// The failure, if the attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

impl AttemptRecord {
    pub fn started(attempt: u32, probe: bool, started_at: DateTime<Utc>) -> Self {
        Self {
            attempt,
            probe,
            started_at,
            finished_at: None,
            error: None,
        }
    }

    pub fn finish(&mut self, finished_at: DateTime<Utc>, error: Option<ActionError>) {
        self.finished_at = Some(finished_at);
        self.error = error;
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn succeeded(&self) -> bool {
        self.is_finished() && self.error.is_none()
    }
}
