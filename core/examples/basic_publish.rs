// herald/examples/basic_publish.rs

use async_trait::async_trait;
use herald::{CancellationToken, EventBroker, EventHandler, HeraldError, RetryPolicy};
use tracing::info;

// 1. Define an event. Any `Send + Sync + 'static` value will do.
#[derive(Debug)]
struct UserSignedUp {
  email: String,
}

// 2. Implement a handler for it.
struct WelcomeMailer;

#[async_trait]
impl EventHandler<UserSignedUp> for WelcomeMailer {
  async fn handle(&self, event: &UserSignedUp, _retry: &RetryPolicy, _cancellation: &CancellationToken) -> anyhow::Result<()> {
    info!("Sending welcome mail to {}", event.email);
    Ok(())
  }
}

struct AuditLog;

#[async_trait]
impl EventHandler<UserSignedUp> for AuditLog {
  async fn handle(&self, event: &UserSignedUp, retry: &RetryPolicy, _cancellation: &CancellationToken) -> anyhow::Result<()> {
    info!("Audit: sign-up of {} (attempt {})", event.email, retry.attempt());
    Ok(())
  }
}

#[tokio::main]
async fn main() -> Result<(), HeraldError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Basic Publish Example ---");

  // 3. Create the broker and subscribe both handlers.
  let broker = EventBroker::new();
  let mailer = broker.subscribe::<UserSignedUp, _>(WelcomeMailer)?;
  broker.subscribe::<UserSignedUp, _>(AuditLog)?;

  // 4. Publish and wait for both invocations.
  let outcomes = broker
    .publish_and_wait(UserSignedUp {
      email: "ada@example.com".to_string(),
    })
    .await?;
  info!("Outcomes: {:?}", outcomes);

  // 5. Unsubscribe one handler with its claim ticket.
  broker.unregister(mailer);
  let started = broker
    .publish(UserSignedUp {
      email: "grace@example.com".to_string(),
    })
    .await?;
  info!("Second publish started {} invocation(s)", started);

  broker.shutdown_and_wait().await;
  Ok(())
}
