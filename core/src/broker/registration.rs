// herald/src/broker/registration.rs

use crate::broker::handler::{Event, EventHandler};
use crate::error::HeraldResult;
use crate::pipeline::definition::{Pipeline, PipelineBuilder};
use crate::retry::RetryConfig;
use std::fmt;
use std::sync::Arc;

/// One pipeline subscribed to events of type `E`, with its optional error
/// hook and retry settings.
pub struct Registration<E: Event> {
  pub(crate) pipeline: Arc<Pipeline>,
  pub(crate) error_hook: Option<Arc<dyn EventHandler<E>>>,
  pub(crate) retry: Option<RetryConfig>,
}

impl<E: Event> Registration<E> {
  /// A bare pipeline. Failures are retried per the retry settings and logged;
  /// there is no error hook.
  pub fn pipeline(pipeline: impl Into<Arc<Pipeline>>) -> Self {
    Self {
      pipeline: pipeline.into(),
      error_hook: None,
      retry: None,
    }
  }

  /// A pipeline whose single step invokes `handler`, which also serves as the
  /// error hook.
  pub fn handler<H: EventHandler<E>>(handler: H) -> HeraldResult<Self> {
    Self::handler_with(handler, |builder| builder)
  }

  /// Like `handler`, with extra steps (typically wrappers) added by `configure`
  /// in front of the handler step.
  pub fn handler_with<H, F>(handler: H, configure: F) -> HeraldResult<Self>
  where
    H: EventHandler<E>,
    F: FnOnce(PipelineBuilder) -> PipelineBuilder,
  {
    let handler: Arc<dyn EventHandler<E>> = Arc::new(handler);
    let builder = Pipeline::builder(std::any::type_name::<H>());
    let pipeline = configure(builder).handler(Arc::clone(&handler)).build()?;
    Ok(Self {
      pipeline: Arc::new(pipeline),
      error_hook: Some(handler),
      retry: None,
    })
  }

  /// Overrides the broker's default retry settings for this registration.
  pub fn with_retry(mut self, retry: RetryConfig) -> Self {
    self.retry = Some(retry);
    self
  }

  /// Attaches (or replaces) the error hook.
  pub fn with_error_hook(mut self, hook: Arc<dyn EventHandler<E>>) -> Self {
    self.error_hook = Some(hook);
    self
  }

  pub fn pipeline_ref(&self) -> &Arc<Pipeline> {
    &self.pipeline
  }
}

impl<E: Event> fmt::Debug for Registration<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Registration")
      .field("event_type", &std::any::type_name::<E>())
      .field("pipeline", &self.pipeline.name())
      .field("error_hook_present", &self.error_hook.is_some())
      .field("retry", &self.retry)
      .finish()
  }
}
