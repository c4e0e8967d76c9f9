//! Circuit breaker shared by every task of one engine.
//!
//! # States
//! - Closed: attempts are admitted normally
//! - Open: the action is assumed broken, nothing is admitted
//! - HalfOpen: one probe attempt tests whether it recovered
//!
//! # Transitions
//! ```text
//! Closed   -> Open:     consecutive_failures >= failure_threshold
//! Open     -> HalfOpen: cool_down elapsed (on the next admission check)
//! HalfOpen -> Closed:   probe succeeds
//! HalfOpen -> Open:     probe fails (cool_down restarts)
//! ```
//!
//! The breaker has no lock of its own: the scheduler mutates it inside the
//! same critical section as the task table, which keeps "check, take a slot,
//! admit" atomic and guarantees a single probe.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cool_down: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
        }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Closed: admit normally.
    Admit,

    /// Cool-down is over: admit exactly one attempt as the half-open probe.
    Probe,

    /// Nothing may start. `retry_at` is when an Open breaker becomes
    /// probe-able; None while a half-open probe is in flight.
    Reject { retry_at: Option<Instant> },
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        !matches!(self, Admission::Reject { .. })
    }
}

/// Serializable view for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,

    /// How many times the breaker has opened.
    pub trips: u64,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    trips: u64,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
            trips: 0,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            trips: self.trips,
        }
    }

    /// Would an attempt be admitted at `now`? Does not change state.
    pub fn check(&self, now: Instant) -> Admission {
        match self.state {
            BreakerState::Closed => Admission::Admit,
            BreakerState::Open => match self.reopen_at() {
                Some(reopen_at) if now >= reopen_at => Admission::Probe,
                retry_at => Admission::Reject { retry_at },
            },
            BreakerState::HalfOpen if self.probe_in_flight => Admission::Reject { retry_at: None },
            // Probe finished without a verdict being recorded; allow another.
            BreakerState::HalfOpen => Admission::Probe,
        }
    }

    /// Commit an admission returned by [`check`](Self::check) at the same instant.
    ///
    /// Returns true if the admitted attempt is the half-open probe.
    pub fn admit(&mut self, admission: Admission) -> bool {
        match admission {
            Admission::Admit => false,
            Admission::Probe => {
                assert!(!self.probe_in_flight, "circuit breaker admitted a second probe");
                if self.state == BreakerState::Open {
                    tracing::info!("circuit breaker half-open, admitting probe");
                }
                self.state = BreakerState::HalfOpen;
                self.probe_in_flight = true;
                true
            }
            Admission::Reject { .. } => panic!("circuit breaker asked to admit a rejected attempt"),
        }
    }

    /// Record a successful attempt. `probe` says whether it was the half-open probe.
    pub fn record_success(&mut self, probe: bool) {
        match self.state {
            BreakerState::Closed => self.consecutive_failures = 0,
            BreakerState::HalfOpen if probe => {
                tracing::info!("circuit breaker closed after successful probe");
                self.state = BreakerState::Closed;
                self.consecutive_failures = 0;
                self.opened_at = None;
                self.probe_in_flight = false;
            }
            // Attempts admitted before the breaker opened do not get a vote.
            BreakerState::HalfOpen | BreakerState::Open => {}
        }
    }

    /// Record a failed attempt at `now`.
    pub fn record_failure(&mut self, probe: bool, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.state {
            BreakerState::Closed if self.consecutive_failures >= self.config.failure_threshold => {
                self.open(now);
            }
            BreakerState::HalfOpen if probe => {
                self.probe_in_flight = false;
                self.open(now);
            }
            BreakerState::Closed | BreakerState::HalfOpen | BreakerState::Open => {}
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.trips += 1;
        tracing::warn!(
            consecutive_failures = self.consecutive_failures,
            cool_down = ?self.config.cool_down,
            "circuit breaker opened"
        );
    }

    /// None when the cool-down runs past the end of the clock.
    fn reopen_at(&self) -> Option<Instant> {
        let opened_at = self
            .opened_at
            .unwrap_or_else(|| panic!("open circuit breaker without opened_at"));
        opened_at.checked_add(self.config.cool_down)
    }
}
