//! Action errors and their classification.

use serde::{Deserialize, Serialize};

/// Classification of an action failure.
///
/// - Transient: may succeed on a later attempt (retried per policy)
/// - Permanent: retrying is pointless (validation failures, etc.)
/// - Cancelled: the engine stopped the task before it could run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
    Cancelled,
}

/// Failure reported by an action (or imposed on its task by the engine).
///
/// Action errors never reach the caller of an engine API directly; they are
/// recorded on the task and observed through `status()` / `wait()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (kind: {kind:?})")]
pub struct ActionError {
    kind: ErrorKind,
    message: String,
}

impl ActionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A failure worth retrying.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// A failure that goes straight to `Failed`.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Map a panic payload caught at the action boundary.
    ///
    /// A panicking action is treated like one that returned an error.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::transient(format!("action panicked: {detail}"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self::transient(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self::transient(message)
    }
}
