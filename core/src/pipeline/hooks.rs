// herald/src/pipeline/hooks.rs

//! Shorthand builder methods for the common step shapes, including the
//! terminal step that invokes an `EventHandler`.

use crate::broker::handler::{Event, EventHandler};
use crate::core::control::PipelineControl;
use crate::core::param::Param;
use crate::core::step::{Step, StepArgs};
use crate::pipeline::definition::PipelineBuilder;
use crate::pipeline::execution::Next;
use crate::retry::RetryPolicy;
use std::future::Future;
use std::sync::Arc;
use tracing::{event, Level};

impl PipelineBuilder {
  /// Appends a plain step without parameter declarations.
  pub fn on<F, Fut, UserErr>(self, step_name: &str, body: F) -> Self
  where
    F: Fn(StepArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PipelineControl, UserErr>> + Send + 'static,
    UserErr: Into<anyhow::Error> + Send + 'static,
  {
    self.step(Step::new(step_name, body))
  }

  /// Appends a wrapper step around everything added after it.
  pub fn around<F, Fut, UserErr>(self, step_name: &str, body: F) -> Self
  where
    F: Fn(StepArgs, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PipelineControl, UserErr>> + Send + 'static,
    UserErr: Into<anyhow::Error> + Send + 'static,
  {
    self.step(Step::wrap(step_name, body))
  }

  /// Appends the step that calls `handler.handle(...)`.
  ///
  /// The event is read from the run context. The chain's `RetryPolicy` is read
  /// from the run context too; outside the broker a detached single-attempt
  /// policy is used.
  pub fn handler<E: Event>(self, handler: Arc<dyn EventHandler<E>>) -> Self {
    let step_name = format!("handle<{}>", std::any::type_name::<E>());
    let step = Step::new(step_name, move |args: StepArgs| {
      let handler = Arc::clone(&handler);
      async move {
        let event = args.get::<E>()?;
        let retry = args.get::<RetryPolicy>()?;
        event!(Level::TRACE, step_name = args.step_name(), attempt = retry.attempt(), "Invoking event handler.");
        handler.handle(&event, &retry, args.cancellation()).await?;
        Ok::<_, anyhow::Error>(PipelineControl::Continue)
      }
    })
    .param(Param::<E>::from_context())
    .param(Param::<RetryPolicy>::from_context().or_default());
    self.step(step)
  }
}
