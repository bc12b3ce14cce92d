// herald/src/broker/dispatch.rs

//! The `EventBroker`: fans each published event out to every pipeline
//! registered for its type and routes failures to retries or error hooks.

use crate::broker::handler::{Event, EventHandler};
use crate::broker::invocation::Invocation;
use crate::broker::registration::Registration;
use crate::config::{BrokerConfig, DispatchMode};
use crate::core::context_data::ContextData;
use crate::core::control::RunOutcome;
use crate::core::run_context::RunContext;
use crate::error::{HeraldError, HeraldResult};
use crate::pipeline::definition::new_context_pool;
use crate::pipeline::execution::RunEnv;
use crate::pool::{Pool, PoolStats, Pooled};
use crate::registry::{ClaimTicket, HandlerRegistry};
use crate::retry::{RetryConfig, RetryJob, RetryPolicy, RetryQueue};
use crate::services::ScopeFactory;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{event, instrument, span, Instrument, Level};

type InvocationFuture = Pin<Box<dyn Future<Output = InvocationOutcome> + Send>>;

/// How one invocation's attempt ended.
#[derive(Debug, Clone)]
pub enum InvocationOutcome {
  Completed,
  Stopped,
  /// The attempt failed and attempt number `attempt` is queued to run after `delay`.
  RetryScheduled { attempt: u32, delay: Duration },
  /// The failure is final. `error` is what the error hook received.
  Failed { error: Arc<HeraldError> },
  Cancelled,
}

impl InvocationOutcome {
  pub fn is_successful(&self) -> bool {
    matches!(self, InvocationOutcome::Completed | InvocationOutcome::Stopped)
  }

  pub fn error(&self) -> Option<&Arc<HeraldError>> {
    match self {
      InvocationOutcome::Failed { error } => Some(error),
      _ => None,
    }
  }
}

enum Routing {
  Done(InvocationOutcome),
  Retry(Duration),
}

struct BrokerCore {
  registry: HandlerRegistry,
  retry_queue: RetryQueue,
  contexts: Pool<ContextData<RunContext>>,
  invocations: Pool<Invocation>,
  policies: Pool<RetryPolicy>,
  scopes: Option<Arc<dyn ScopeFactory>>,
  limiter: Option<Arc<Semaphore>>,
  shutdown: CancellationToken,
  tracker: TaskTracker,
  config: BrokerConfig,
}

impl BrokerCore {
  fn retry_config<E: Event>(&self, registration: &Registration<E>) -> RetryConfig {
    registration.retry.unwrap_or(self.config.default_retry)
  }

  /// Spawns one invocation per registration in `E`'s current snapshot.
  fn spawn_all<E: Event>(self: &Arc<Self>, event: E) -> Vec<JoinHandle<InvocationOutcome>> {
    let Some(snapshot) = self.registry.snapshot::<E>() else {
      event!(Level::TRACE, event_type = %std::any::type_name::<E>(), "No registrations for event type.");
      return Vec::new();
    };

    let event = Arc::new(event);
    let mut handles = Vec::with_capacity(snapshot.len());
    for (index, entry) in snapshot.iter().enumerate() {
      let Some(registration) = entry.downcast::<E>() else {
        event!(Level::ERROR, ticket = ?entry.ticket, "Registration stored under the wrong event type, skipping.");
        continue;
      };
      let policy = self.policies.acquire();
      policy.configure(self.retry_config(&registration).max_attempts());
      let invocation = Self::invoke(Arc::clone(self), registration, Arc::clone(&event), policy, index);
      handles.push(self.tracker.spawn(invocation));
    }
    handles
  }

  /// One attempt of one registration for one event.
  ///
  /// Returns an explicitly boxed future: retries re-enter this function from
  /// the retry queue.
  fn invoke<E: Event>(
    core: Arc<Self>,
    registration: Arc<Registration<E>>,
    event: Arc<E>,
    policy: Pooled<RetryPolicy>,
    index: usize,
  ) -> InvocationFuture {
    let span = span!(
      Level::DEBUG,
      "invocation",
      event_type = %std::any::type_name::<E>(),
      pipeline = %registration.pipeline.name(),
      attempt = policy.attempt(),
    );

    Box::pin(
      async move {
        let cancellation = core.shutdown.child_token();
        let permit = match &core.limiter {
          Some(limiter) => tokio::select! {
            permit = Arc::clone(limiter).acquire_owned() => permit.ok(),
            _ = cancellation.cancelled() => {
              event!(Level::DEBUG, "Invocation cancelled while waiting for a concurrency permit.");
              return InvocationOutcome::Cancelled;
            }
          },
          None => None,
        };

        let mut invocation = core.invocations.acquire();
        invocation.begin(Arc::clone(&event), index, (*policy).clone(), cancellation, permit);
        event!(
          Level::DEBUG,
          registration = invocation.registration(),
          attempt = invocation.attempt(),
          "Invocation starting."
        );

        let ctx = core.contexts.acquire();
        {
          let mut guard = ctx.write();
          guard.insert_arc(Arc::clone(&event));
          guard.insert((*policy).clone());
        }
        let mut env = RunEnv::new().with_cancellation(invocation.cancellation());
        if let Some(factory) = &core.scopes {
          env = env.with_scope(factory.create_scope());
        }

        let result = registration.pipeline.run_with(ctx, env).await;
        let outcome = result.outcome();
        let error = result.error().cloned();
        // Releases the run context before the policy is recycled.
        drop(result);

        let routing = match (outcome, error) {
          (RunOutcome::Completed, _) => Routing::Done(InvocationOutcome::Completed),
          (RunOutcome::Stopped, _) => Routing::Done(InvocationOutcome::Stopped),
          (RunOutcome::Failed, Some(error)) => core.route_failure(&*registration, &invocation, error).await,
          (RunOutcome::Failed, None) => Routing::Done(InvocationOutcome::Failed {
            error: Arc::new(HeraldError::Internal("failed run carried no error".to_string())),
          }),
        };
        drop(invocation);

        match routing {
          Routing::Done(outcome) => {
            event!(Level::DEBUG, ?outcome, "Invocation finished.");
            outcome
          }
          Routing::Retry(delay) => core.schedule_retry(registration, event, policy, index, delay),
        }
      }
      .instrument(span),
    )
  }

  /// Decides between a retry and the error hook for a failed attempt.
  async fn route_failure<E: Event>(
    &self,
    registration: &Registration<E>,
    invocation: &Invocation,
    error: Arc<HeraldError>,
  ) -> Routing {
    if error.is_cancelled() || invocation.is_cancelled() {
      event!(Level::DEBUG, "Invocation cancelled, not retried.");
      return Routing::Done(InvocationOutcome::Cancelled);
    }

    let (Some(event), Some(policy)) = (invocation.event::<E>(), invocation.retry()) else {
      event!(Level::ERROR, event_type = invocation.event_type(), "Invocation state missing, failure not routed.");
      return Routing::Done(InvocationOutcome::Failed { error });
    };
    let cancellation = invocation.cancellation();

    if let Some(delay) = policy.take_requested() {
      event!(Level::DEBUG, delay_ms = delay.as_millis() as u64, "Handler requested a retry.");
      return Routing::Retry(delay);
    }

    let retry = self.retry_config(registration);
    if retry.is_automatic() {
      let delay = retry.delay_for(policy.retries());
      if policy.request_retry(delay).is_ok() {
        policy.take_requested();
        event!(Level::WARN, error = %error, retries = policy.retries(), "Attempt failed, retrying.");
        return Routing::Retry(delay);
      }
    }

    let hook_error = if retry.is_automatic() && retry.max_retries > 0 {
      Arc::new(HeraldError::RetryExhausted {
        max_attempts: policy.max_attempts(),
        last_error: Some(Arc::clone(&error)),
      })
    } else {
      error
    };

    match &registration.error_hook {
      Some(hook) => {
        if let Err(hook_err) = hook.on_error(&hook_error, &*event, policy, &cancellation).await {
          event!(Level::ERROR, error = %hook_err, "Error hook failed.");
        }
        if let Some(delay) = policy.take_requested() {
          event!(Level::DEBUG, delay_ms = delay.as_millis() as u64, "Error hook requested a retry.");
          return Routing::Retry(delay);
        }
      }
      None => {
        event!(Level::WARN, error = %hook_error, "Invocation failed and no error hook is registered.");
      }
    }

    event!(Level::ERROR, error = %hook_error, "Invocation failed.");
    Routing::Done(InvocationOutcome::Failed { error: hook_error })
  }

  fn schedule_retry<E: Event>(
    self: Arc<Self>,
    registration: Arc<Registration<E>>,
    event: Arc<E>,
    policy: Pooled<RetryPolicy>,
    index: usize,
    delay: Duration,
  ) -> InvocationOutcome {
    let attempt = policy.attempt();
    let weak = Arc::downgrade(&self);
    let job: RetryJob = Box::new(move || -> Pin<Box<dyn Future<Output = ()> + Send>> {
      Box::pin(async move {
        match weak.upgrade() {
          Some(core) => {
            BrokerCore::invoke(core, registration, event, policy, index).await;
          }
          None => event!(Level::DEBUG, "Broker dropped before the retry was due."),
        }
      })
    });

    match self.retry_queue.schedule(delay, job) {
      Ok(()) => InvocationOutcome::RetryScheduled { attempt, delay },
      Err(err) => {
        event!(Level::WARN, error = %err, "Retry discarded.");
        InvocationOutcome::Cancelled
      }
    }
  }
}

impl Drop for BrokerCore {
  fn drop(&mut self) {
    self.shutdown.cancel();
  }
}

/// Configures an [`EventBroker`].
#[derive(Default)]
pub struct EventBrokerBuilder {
  config: BrokerConfig,
  scopes: Option<Arc<dyn ScopeFactory>>,
}

impl EventBrokerBuilder {
  pub fn config(mut self, config: BrokerConfig) -> Self {
    self.config = config;
    self
  }

  /// Every invocation then runs inside its own service scope.
  pub fn scope_factory(mut self, factory: Arc<dyn ScopeFactory>) -> Self {
    self.scopes = Some(factory);
    self
  }

  /// Builds the broker and starts its retry loop. Must be called inside a tokio runtime.
  pub fn build(self) -> EventBroker {
    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();
    let config = self.config;
    let core = BrokerCore {
      registry: HandlerRegistry::new(),
      retry_queue: RetryQueue::start(shutdown.child_token(), tracker.clone()),
      contexts: new_context_pool(config.context_pool_capacity),
      invocations: Pool::with_default(config.invocation_pool_capacity),
      policies: Pool::with_default(config.retry_policy_pool_capacity),
      scopes: self.scopes,
      limiter: config.max_concurrent_invocations.map(|limit| Arc::new(Semaphore::new(limit.max(1)))),
      shutdown,
      tracker,
      config,
    };
    event!(Level::INFO, config = ?core.config, "Event broker started.");
    EventBroker { core: Arc::new(core) }
  }
}

/// In-process event broker. Cheap to clone; clones share one broker.
#[derive(Clone)]
pub struct EventBroker {
  core: Arc<BrokerCore>,
}

impl EventBroker {
  /// A broker with the default configuration. Must be called inside a tokio runtime.
  pub fn new() -> Self {
    Self::builder().build()
  }

  pub fn with_config(config: BrokerConfig) -> Self {
    Self::builder().config(config).build()
  }

  pub fn builder() -> EventBrokerBuilder {
    EventBrokerBuilder::default()
  }

  pub fn config(&self) -> &BrokerConfig {
    &self.core.config
  }

  pub fn registry(&self) -> &HandlerRegistry {
    &self.core.registry
  }

  pub fn register<E: Event>(&self, registration: Registration<E>) -> ClaimTicket {
    self.core.registry.add(registration)
  }

  /// Registers `handler` as a one-step pipeline with the default retry settings.
  pub fn subscribe<E, H>(&self, handler: H) -> HeraldResult<ClaimTicket>
  where
    E: Event,
    H: EventHandler<E>,
  {
    Ok(self.register(Registration::handler(handler)?))
  }

  pub fn subscribe_with<E, H>(&self, handler: H, retry: RetryConfig) -> HeraldResult<ClaimTicket>
  where
    E: Event,
    H: EventHandler<E>,
  {
    Ok(self.register(Registration::handler(handler)?.with_retry(retry)))
  }

  pub fn unregister(&self, ticket: ClaimTicket) -> bool {
    self.core.registry.remove(ticket)
  }

  pub fn unregister_all(&self, tickets: impl IntoIterator<Item = ClaimTicket>) -> usize {
    self.core.registry.remove_range(tickets)
  }

  /// Dispatches `event` to every registration for exactly `E`.
  ///
  /// Returns the number of invocations started. When to return is decided by
  /// the configured [`DispatchMode`]; failures never surface here.
  #[instrument(name = "EventBroker::publish", skip_all, fields(event_type = %std::any::type_name::<E>()))]
  pub async fn publish<E: Event>(&self, event: E) -> HeraldResult<usize> {
    if self.core.shutdown.is_cancelled() {
      return Err(HeraldError::Shutdown);
    }
    let handles = self.core.spawn_all(event);
    let count = handles.len();
    if self.core.config.dispatch_mode == DispatchMode::WaitForCompletion {
      for handle in handles {
        if let Err(join_err) = handle.await {
          event!(Level::ERROR, error = %join_err, "Invocation task ended abnormally.");
        }
      }
    }
    event!(Level::DEBUG, invocations = count, "Event published.");
    Ok(count)
  }

  /// Dispatches `event` and waits for every invocation's first attempt.
  #[instrument(name = "EventBroker::publish_and_wait", skip_all, fields(event_type = %std::any::type_name::<E>()))]
  pub async fn publish_and_wait<E: Event>(&self, event: E) -> HeraldResult<Vec<InvocationOutcome>> {
    if self.core.shutdown.is_cancelled() {
      return Err(HeraldError::Shutdown);
    }
    let handles = self.core.spawn_all(event);
    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
      let outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(join_err) => {
          event!(Level::ERROR, error = %join_err, "Invocation task ended abnormally.");
          InvocationOutcome::Failed {
            error: Arc::new(HeraldError::Internal(format!("invocation task failed: {}", join_err))),
          }
        }
      };
      outcomes.push(outcome);
    }
    Ok(outcomes)
  }

  /// Retries waiting in the retry queue.
  pub fn pending_retries(&self) -> usize {
    self.core.retry_queue.len()
  }

  pub fn context_pool_stats(&self) -> PoolStats {
    self.core.contexts.stats()
  }

  pub fn invocation_pool_stats(&self) -> PoolStats {
    self.core.invocations.stats()
  }

  pub fn retry_policy_pool_stats(&self) -> PoolStats {
    self.core.policies.stats()
  }

  pub fn is_shut_down(&self) -> bool {
    self.core.shutdown.is_cancelled()
  }

  /// Cancels every running invocation and discards pending retries.
  pub fn shutdown(&self) {
    if self.core.shutdown.is_cancelled() {
      return;
    }
    event!(Level::INFO, pending_retries = self.pending_retries(), "Event broker shutting down.");
    self.core.shutdown.cancel();
    self.core.retry_queue.cancel();
    self.core.tracker.close();
  }

  /// `shutdown`, then waits until every spawned invocation task has ended.
  pub async fn shutdown_and_wait(&self) {
    self.shutdown();
    self.core.tracker.close();
    self.core.tracker.wait().await;
    event!(Level::INFO, "Event broker stopped.");
  }
}

impl fmt::Debug for EventBroker {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EventBroker")
      .field("registry", &self.core.registry)
      .field("pending_retries", &self.pending_retries())
      .field("shut_down", &self.is_shut_down())
      .finish()
  }
}
