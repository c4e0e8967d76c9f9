//! Resilience building blocks: circuit breaker and concurrency limiter.

pub mod circuit;
pub mod limiter;

pub use self::circuit::{Admission, BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use self::limiter::{ConcurrencyLimiter, Permit};
