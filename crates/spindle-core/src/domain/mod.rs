//! Domain model (ids, status, actions, errors, attempt history, decisions).

pub mod action;
pub mod attempt;
pub mod decision;
pub mod errors;
pub mod ids;
pub mod state;

pub use action::Action;
pub use attempt::AttemptRecord;
pub use decision::{Decider, Decision};
pub use errors::{ActionError, ErrorKind};
pub use ids::TaskId;
pub use state::TaskStatus;
