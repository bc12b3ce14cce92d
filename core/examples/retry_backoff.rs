// herald/examples/retry_backoff.rs

use async_trait::async_trait;
use herald::{CancellationToken, EventBroker, EventHandler, HeraldError, RetryConfig, RetryPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

#[derive(Debug)]
struct PaymentRequested {
  amount_cents: u64,
}

/// Succeeds on the third attempt, simulating a flaky payment gateway.
struct Gateway {
  calls: AtomicU32,
  done: Notify,
}

#[async_trait]
impl EventHandler<PaymentRequested> for Gateway {
  async fn handle(&self, event: &PaymentRequested, retry: &RetryPolicy, _cancellation: &CancellationToken) -> anyhow::Result<()> {
    let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
    info!("Charging {} cents, attempt {} of {}", event.amount_cents, retry.attempt(), retry.max_attempts());
    if call < 3 {
      anyhow::bail!("gateway timeout");
    }
    self.done.notify_one();
    Ok(())
  }

  async fn on_error(
    &self,
    error: &HeraldError,
    _event: &PaymentRequested,
    _retry: &RetryPolicy,
    _cancellation: &CancellationToken,
  ) -> anyhow::Result<()> {
    warn!("Payment gave up: {}", error);
    self.done.notify_one();
    Ok(())
  }
}

#[tokio::main]
async fn main() -> Result<(), HeraldError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Retry With Backoff Example ---");

  let broker = EventBroker::new();
  let gateway = std::sync::Arc::new(Gateway {
    calls: AtomicU32::new(0),
    done: Notify::new(),
  });

  // Up to 4 retries, 50ms, 100ms, 200ms ... capped at 1s.
  let retry = RetryConfig::exponential(4, Duration::from_millis(50), Duration::from_secs(1));
  broker.register(
    herald::Registration::<PaymentRequested>::handler(SharedGateway(gateway.clone()))?.with_retry(retry),
  );

  let outcomes = broker.publish_and_wait(PaymentRequested { amount_cents: 1_999 }).await?;
  info!("First attempt: {:?}", outcomes);

  gateway.done.notified().await;
  info!("Gateway was called {} times", gateway.calls.load(Ordering::SeqCst));

  broker.shutdown_and_wait().await;
  Ok(())
}

/// Lets `main` keep a handle on the gateway it registers.
struct SharedGateway(std::sync::Arc<Gateway>);

#[async_trait]
impl EventHandler<PaymentRequested> for SharedGateway {
  async fn handle(&self, event: &PaymentRequested, retry: &RetryPolicy, cancellation: &CancellationToken) -> anyhow::Result<()> {
    self.0.handle(event, retry, cancellation).await
  }

  async fn on_error(
    &self,
    error: &HeraldError,
    event: &PaymentRequested,
    retry: &RetryPolicy,
    cancellation: &CancellationToken,
  ) -> anyhow::Result<()> {
    self.0.on_error(error, event, retry, cancellation).await
  }
}
