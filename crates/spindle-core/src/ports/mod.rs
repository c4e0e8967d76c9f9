//! Ports - seams for the engine's outside dependencies.
//!
//! The engine itself is in-memory; the only things it takes from outside are
//! wall-clock time and id generation, both replaceable in tests.

pub mod clock;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
