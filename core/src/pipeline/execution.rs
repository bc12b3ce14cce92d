// herald/src/pipeline/execution.rs

//! Contains `Pipeline::run()` and friends, responsible for executing the
//! pipeline's steps in order and turning any failure into a `PipelineResult`.

use crate::core::context_data::ContextData;
use crate::core::control::PipelineControl;
use crate::core::param::resolve_params;
use crate::core::run_context::RunContext;
use crate::core::step::{Step, StepArgs, StepKind};
use crate::error::{HeraldError, HeraldResult};
use crate::pipeline::definition::{Pipeline, PooledContext};
use crate::pipeline::result::PipelineResult;
use crate::services::ServiceScope;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, span, Instrument, Level};

type ChainFuture = Pin<Box<dyn Future<Output = HeraldResult<PipelineControl>> + Send>>;

/// Per-run environment: the host service scope for this unit of work and the
/// cancellation token checked before every step.
#[derive(Clone, Default)]
pub struct RunEnv {
  pub(crate) scope: Option<Arc<dyn ServiceScope>>,
  pub(crate) cancellation: CancellationToken,
}

impl RunEnv {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_scope(mut self, scope: Arc<dyn ServiceScope>) -> Self {
    self.scope = Some(scope);
    self
  }

  pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
    self.cancellation = cancellation;
    self
  }

  pub fn cancellation(&self) -> &CancellationToken {
    &self.cancellation
  }
}

impl fmt::Debug for RunEnv {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RunEnv")
      .field("scope_present", &self.scope.is_some())
      .field("cancelled", &self.cancellation.is_cancelled())
      .finish()
  }
}

/// The remaining steps of a run, handed to wrapper steps.
pub struct Next {
  chain: Chain,
}

impl Next {
  /// Runs every remaining step.
  ///
  /// `Continue` means they all completed, `Stop` means one of them short-circuited.
  pub fn run(self) -> Pin<Box<dyn Future<Output = HeraldResult<PipelineControl>> + Send>> {
    drive(self.chain)
  }

  pub fn remaining(&self) -> usize {
    self.chain.steps.len().saturating_sub(self.chain.index)
  }
}

impl fmt::Debug for Next {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Next")
      .field("pipeline", &self.chain.pipeline)
      .field("remaining", &self.remaining())
      .finish()
  }
}

#[derive(Clone)]
struct Chain {
  pipeline: Arc<str>,
  steps: Arc<[Step]>,
  index: usize,
  ctx: ContextData<RunContext>,
  env: RunEnv,
}

impl Chain {
  fn at(&self, index: usize) -> Self {
    Chain { index, ..self.clone() }
  }

  fn args_for(&self, step: &Step) -> HeraldResult<StepArgs> {
    let values = {
      let guard = self.ctx.read();
      resolve_params(step.name(), &step.params, &guard, self.env.scope.as_deref())?
    };
    Ok(StepArgs {
      step_name: Arc::clone(&step.name),
      values,
      ctx: self.ctx.clone(),
      env: self.env.clone(),
    })
  }
}

/// Executes steps starting at `chain.index`.
///
/// Consecutive plain steps run in a loop; a wrapper step receives the rest of
/// the chain as `Next` and its result becomes the result of the whole chain.
fn drive(chain: Chain) -> ChainFuture {
  Box::pin(async move {
    let mut index = chain.index;
    while let Some(step) = chain.steps.get(index) {
      let step_name = step.name();
      if chain.env.cancellation.is_cancelled() {
        event!(Level::WARN, step_name, "Run cancelled, remaining steps abandoned.");
        return Err(HeraldError::Cancelled {
          step_name: step_name.to_string(),
        });
      }

      let skip = match &step.skip_if {
        Some(condition) => condition(&*chain.ctx.read()),
        None => false,
      };
      if skip {
        event!(Level::DEBUG, step_name, "Step skipped due to 'skip_if' condition.");
        index += 1;
        continue;
      }

      let step_span = span!(Level::DEBUG, "pipeline_step", step_name, step_index = index);
      let args = chain.args_for(step).map_err(|e| {
        event!(parent: &step_span, Level::ERROR, error = %e, "Parameter resolution failed.");
        e
      })?;

      match &step.kind {
        StepKind::Run(step_fn) => {
          let control = step_fn(args)
            .instrument(step_span.clone())
            .await
            .map_err(|e| HeraldError::from_step(step_name, e))?;
          match control {
            PipelineControl::Continue => index += 1,
            PipelineControl::Stop => {
              event!(parent: &step_span, Level::INFO, "Pipeline stopped by step.");
              return Ok(PipelineControl::Stop);
            }
          }
        }
        StepKind::Wrap(wrap_fn) => {
          let next = Next {
            chain: chain.at(index + 1),
          };
          return wrap_fn(args, next)
            .instrument(step_span)
            .await
            .map_err(|e| HeraldError::from_step(step_name, e));
        }
      }
    }
    Ok(PipelineControl::Continue)
  })
}

impl Pipeline {
  /// Runs the pipeline with a fresh context from its own pool.
  pub async fn run(&self) -> PipelineResult {
    self.run_with(self.contexts.acquire(), RunEnv::default()).await
  }

  /// Runs the pipeline with a fresh context and an explicit environment.
  pub async fn run_in(&self, env: RunEnv) -> PipelineResult {
    self.run_with(self.contexts.acquire(), env).await
  }

  /// Runs the pipeline against `ctx`.
  ///
  /// Never fails for errors raised inside steps: they are captured in the
  /// returned result (and the context's error slot). The result owns the
  /// context; it returns to its pool when the result is dropped.
  #[instrument(
    name = "Pipeline::run",
    skip_all,
    fields(pipeline = %self.name, num_steps = self.steps.len())
  )]
  pub async fn run_with(&self, ctx: PooledContext, env: RunEnv) -> PipelineResult {
    event!(Level::DEBUG, "Pipeline execution starting.");
    let chain = Chain {
      pipeline: Arc::clone(&self.name),
      steps: Arc::clone(&self.steps),
      index: 0,
      ctx: (*ctx).clone(),
      env,
    };

    match drive(chain).await {
      Ok(control) => {
        event!(Level::DEBUG, ?control, "Pipeline execution finished.");
        PipelineResult::success(control.into(), ctx)
      }
      Err(err) => {
        event!(Level::ERROR, error = %err, "Pipeline execution failed.");
        let err = Arc::new(err);
        ctx.write().set_error(Arc::clone(&err));
        PipelineResult::failure(err, ctx)
      }
    }
  }
}
