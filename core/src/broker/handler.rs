// herald/src/broker/handler.rs

//! The handler abstraction the broker drives.

use crate::error::HeraldError;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Marker for publishable values. The runtime type is the dispatch key.
pub trait Event: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Event for T {}

/// User logic reacting to one event type.
///
/// `handle` may call `retry.request_retry(delay)` before failing to pick its
/// own delay. `on_error` runs when a failure is final (or after every failure
/// in `RetryMode::OnRequest`) and may request another attempt the same way.
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
  async fn handle(&self, event: &E, retry: &RetryPolicy, cancellation: &CancellationToken) -> anyhow::Result<()>;

  async fn on_error(
    &self,
    error: &HeraldError,
    event: &E,
    retry: &RetryPolicy,
    cancellation: &CancellationToken,
  ) -> anyhow::Result<()> {
    let _ = (error, event, retry, cancellation);
    Ok(())
  }
}
