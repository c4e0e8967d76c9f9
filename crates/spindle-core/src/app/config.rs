//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::queue::ExponentialBackoff;
use crate::resilience::BreakerConfig;

/// Construction-time configuration.
///
/// Durations are carried in milliseconds so the struct reads naturally from
/// JSON; missing fields take their defaults:
///
/// ```json
/// { "concurrency": 8, "max_attempts": 5, "cool_down_ms": 10000 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of tasks executing at once.
    pub concurrency: usize,

    /// Attempts per task, the first one included.
    pub max_attempts: u32,

    /// Backoff after the first failure.
    pub base_delay_ms: u64,

    /// Ceiling for any backoff delay.
    pub max_delay_ms: u64,

    pub backoff_multiplier: f64,

    /// Random extra delay, as a fraction of the backoff (0.0 disables).
    pub jitter: f64,

    /// Consecutive failed attempts that open the circuit breaker.
    pub failure_threshold: u32,

    /// How long the breaker stays open before probing.
    pub cool_down_ms: u64,

    /// Keep finished tasks this long; None keeps them until taken.
    pub retention_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: 0.1,
            failure_threshold: 5,
            cool_down_ms: 30_000,
            retention_ms: None,
        }
    }
}

/// Invalid configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("concurrency {requested} exceeds the supported maximum of {max}")]
    ConcurrencyTooLarge { requested: usize, max: usize },

    #[error("max_attempts must be at least 1")]
    ZeroMaxAttempts,

    #[error("failure_threshold must be at least 1")]
    ZeroFailureThreshold,

    #[error("base_delay_ms ({base}) must not exceed max_delay_ms ({max})")]
    BaseDelayAboveMax { base: u64, max: u64 },

    #[error("backoff_multiplier must be a finite number >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("jitter must be within [0.0, 1.0], got {0}")]
    InvalidJitter(f64),

    #[error("retention_ms must be at least 1 when set")]
    ZeroRetention,

    #[error("invalid config JSON: {0}")]
    Parse(String),
}

impl EngineConfig {
    /// Parse a JSON document; absent fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.concurrency > Semaphore::MAX_PERMITS {
            return Err(ConfigError::ConcurrencyTooLarge {
                requested: self.concurrency,
                max: Semaphore::MAX_PERMITS,
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroMaxAttempts);
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::BaseDelayAboveMax {
                base: self.base_delay_ms,
                max: self.max_delay_ms,
            });
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.backoff_multiplier));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::InvalidJitter(self.jitter));
        }
        if self.retention_ms == Some(0) {
            return Err(ConfigError::ZeroRetention);
        }
        Ok(())
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn cool_down(&self) -> Duration {
        Duration::from_millis(self.cool_down_ms)
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention_ms.map(Duration::from_millis)
    }

    /// The default retry policy this config describes.
    pub fn retry_policy(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.max_attempts, self.base_delay(), self.max_delay())
            .with_multiplier(self.backoff_multiplier)
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            cool_down: self.cool_down(),
        }
    }
}
