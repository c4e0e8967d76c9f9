//! Action - the unit of work a task executes.

use std::future::Future;

use async_trait::async_trait;

use super::errors::ActionError;

/// An action is invoked once per attempt and must be safe to invoke again
/// after a failure.
///
/// The engine never looks inside an action; any I/O it performs is its own
/// business. Any `Fn() -> impl Future<Output = Result<T, ActionError>>`
/// closure is an action:
///
/// ```ignore
/// let id = scheduler
///     .submit(|| async { fetch_page("https://example.com").await.map_err(ActionError::from) })
///     .await?;
/// ```
#[async_trait]
pub trait Action<T>: Send + Sync {
    async fn run(&self) -> Result<T, ActionError>;
}

#[async_trait]
impl<T, F, Fut> Action<T> for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, ActionError>> + Send + 'static,
    T: Send + 'static,
{
    async fn run(&self) -> Result<T, ActionError> {
        (self)().await
    }
}
