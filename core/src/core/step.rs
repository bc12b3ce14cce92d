// herald/src/core/step.rs

//! Defines a single step within a pipeline and the arguments it runs with.

use crate::core::context_data::ContextData;
use crate::core::control::PipelineControl;
use crate::core::param::{Param, ParamSpec};
use crate::core::run_context::{ContextValue, RunContext};
use crate::error::{HeraldError, HeraldResult};
use crate::pipeline::execution::{Next, RunEnv};
use crate::services::ServiceScope;
use std::any::TypeId;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The boxed future every step body is turned into.
pub type StepFuture = Pin<Box<dyn Future<Output = anyhow::Result<PipelineControl>> + Send>>;

pub(crate) type StepFn = Arc<dyn Fn(StepArgs) -> StepFuture + Send + Sync>;
pub(crate) type WrapFn = Arc<dyn Fn(StepArgs, Next) -> StepFuture + Send + Sync>;

/// Evaluated before a step runs; if it returns true the step is skipped.
pub type SkipCondition = Arc<dyn Fn(&RunContext) -> bool + Send + Sync + 'static>;

#[derive(Clone)]
pub(crate) enum StepKind {
  /// Runs, then the engine moves on (or stops).
  Run(StepFn),
  /// Receives the rest of the pipeline as `Next` and decides whether to run it.
  Wrap(WrapFn),
}

/// Definition of a pipeline step: its body, its parameter declarations and
/// an optional skip condition.
#[derive(Clone)]
pub struct Step {
  pub(crate) name: Arc<str>,
  pub(crate) kind: StepKind,
  pub(crate) params: Vec<ParamSpec>,
  pub(crate) skip_if: Option<SkipCondition>,
}

impl Step {
  /// A plain step. Returning `PipelineControl::Stop` short-circuits the run.
  pub fn new<F, Fut, UserErr>(name: impl Into<String>, body: F) -> Self
  where
    F: Fn(StepArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PipelineControl, UserErr>> + Send + 'static,
    UserErr: Into<anyhow::Error> + Send + 'static,
  {
    let step_fn: StepFn = Arc::new(move |args: StepArgs| -> StepFuture {
      let user_fut = body(args);
      Box::pin(async move { user_fut.await.map_err(Into::into) })
    });
    Self::with_kind(name, StepKind::Run(step_fn))
  }

  /// A wrapper (middleware) step. Awaiting `next.run()` executes the remaining
  /// steps; not calling it short-circuits them.
  pub fn wrap<F, Fut, UserErr>(name: impl Into<String>, body: F) -> Self
  where
    F: Fn(StepArgs, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PipelineControl, UserErr>> + Send + 'static,
    UserErr: Into<anyhow::Error> + Send + 'static,
  {
    let wrap_fn: WrapFn = Arc::new(move |args: StepArgs, next: Next| -> StepFuture {
      let user_fut = body(args, next);
      Box::pin(async move { user_fut.await.map_err(Into::into) })
    });
    Self::with_kind(name, StepKind::Wrap(wrap_fn))
  }

  fn with_kind(name: impl Into<String>, kind: StepKind) -> Self {
    let name: String = name.into();
    Self {
      name: Arc::from(name),
      kind,
      params: Vec::new(),
      skip_if: None,
    }
  }

  /// Declares a parameter. Duplicate types are rejected when the pipeline is built.
  pub fn param<T: Send + Sync + 'static>(mut self, param: Param<T>) -> Self {
    self.params.push(param.into());
    self
  }

  pub fn skip_if(mut self, condition: impl Fn(&RunContext) -> bool + Send + Sync + 'static) -> Self {
    self.skip_if = Some(Arc::new(condition));
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn params(&self) -> &[ParamSpec] {
    &self.params
  }

  pub fn is_wrapper(&self) -> bool {
    matches!(self.kind, StepKind::Wrap(_))
  }

  pub(crate) fn check_params(&self) -> HeraldResult<()> {
    for (idx, spec) in self.params.iter().enumerate() {
      if self.params[..idx].iter().any(|earlier| earlier.type_id == spec.type_id) {
        return Err(HeraldError::DuplicateParameter {
          step_name: self.name.to_string(),
          type_name: spec.type_name,
        });
      }
    }
    Ok(())
  }
}

impl fmt::Debug for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Step")
      .field("name", &self.name)
      .field("wrapper", &self.is_wrapper())
      .field("params", &self.params)
      .field("skip_if_present", &self.skip_if.is_some())
      .finish()
  }
}

/// Everything a step body receives: its resolved parameters, the shared run
/// context and the run's environment.
pub struct StepArgs {
  pub(crate) step_name: Arc<str>,
  pub(crate) values: Vec<(TypeId, ContextValue)>,
  pub(crate) ctx: ContextData<RunContext>,
  pub(crate) env: RunEnv,
}

impl StepArgs {
  /// Returns a resolved parameter. Only declared parameters are available.
  pub fn get<T: Send + Sync + 'static>(&self) -> HeraldResult<Arc<T>> {
    let type_id = TypeId::of::<T>();
    self
      .values
      .iter()
      .find(|(id, _)| *id == type_id)
      .and_then(|(_, value)| Arc::clone(value).downcast::<T>().ok())
      .ok_or_else(|| HeraldError::ParameterResolution {
        step_name: self.step_name.to_string(),
        type_name: std::any::type_name::<T>(),
        searched: "declared parameters",
      })
  }

  /// The run context shared by all steps of this run.
  pub fn context(&self) -> &ContextData<RunContext> {
    &self.ctx
  }

  pub fn cancellation(&self) -> &CancellationToken {
    &self.env.cancellation
  }

  pub fn services(&self) -> Option<&Arc<dyn ServiceScope>> {
    self.env.scope.as_ref()
  }

  pub fn step_name(&self) -> &str {
    &self.step_name
  }
}

impl fmt::Debug for StepArgs {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StepArgs")
      .field("step_name", &self.step_name)
      .field("resolved", &self.values.len())
      .finish()
  }
}
