//! SchedulerBuilder - wiring and fail-fast validation.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use super::config::{ConfigError, EngineConfig};
use super::engine::Shared;
use super::scheduler::Scheduler;
use crate::domain::Decider;
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::queue::RetryPolicy;

/// Builds a [`Scheduler`].
///
/// # Example
/// ```ignore
/// let scheduler = Scheduler::<String>::builder()
///     .concurrency(8)
///     .max_attempts(5)
///     .cool_down(Duration::from_secs(10))
///     .build()?;
/// ```
///
/// # Fail-fast
/// `build()` validates the whole configuration and refuses to start an
/// engine that could never run a task (zero concurrency, zero attempts, ...).
pub struct SchedulerBuilder<T> {
    config: EngineConfig,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    _result: PhantomData<fn() -> T>,
}

/// Errors while building a scheduler.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("no tokio runtime is running; build the scheduler from inside one")]
    NoRuntime,
}

impl<T: Clone + Send + 'static> SchedulerBuilder<T> {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            retry_policy: None,
            clock: Arc::new(SystemClock),
            ids: None,
            _result: PhantomData,
        }
    }

    /// Replace the whole configuration. Later setters override its fields.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay_ms = millis(delay);
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay_ms = millis(delay);
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    /// 0.0 makes backoff delays exact.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn cool_down(mut self, cool_down: Duration) -> Self {
        self.config.cool_down_ms = millis(cool_down);
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.retention_ms = Some(millis(retention));
        self
    }

    /// Use a custom retry policy instead of the config's exponential backoff.
    /// `max_delay` still caps jitter.
    pub fn retry_policy<P: RetryPolicy + 'static>(mut self, policy: P) -> Self {
        self.retry_policy = Some(Arc::new(policy));
        self
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn id_generator<G: IdGenerator + 'static>(mut self, ids: G) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    /// Validate and start the engine on the current tokio runtime.
    pub fn build(self) -> Result<Scheduler<T>, BuildError> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BuildError::NoRuntime)?;

        let policy = self
            .retry_policy
            .unwrap_or_else(|| Arc::new(self.config.retry_policy()));
        let decider = Decider::new(policy, self.config.jitter, self.config.max_delay());
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&self.clock))));

        tracing::info!(
            concurrency = self.config.concurrency,
            max_attempts = self.config.max_attempts,
            failure_threshold = self.config.failure_threshold,
            cool_down_ms = self.config.cool_down_ms,
            "starting scheduler"
        );
        let shared = Shared::new(self.config, decider, self.clock, ids);
        Ok(Scheduler::start(shared, &runtime))
    }
}

impl<T: Clone + Send + 'static> Default for SchedulerBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
