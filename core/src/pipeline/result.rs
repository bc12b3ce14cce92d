// herald/src/pipeline/result.rs

use crate::core::control::RunOutcome;
use crate::core::run_context::RunContext;
use crate::error::HeraldError;
use crate::pipeline::definition::PooledContext;
use parking_lot::RwLockReadGuard;
use std::fmt;
use std::sync::Arc;

/// The outcome of one pipeline run.
///
/// Owns the run's context: values written by the steps stay readable for as
/// long as the result is alive, and the context goes back to its pool (cleared)
/// when the result is dropped.
pub struct PipelineResult {
  outcome: RunOutcome,
  error: Option<Arc<HeraldError>>,
  context: PooledContext,
}

impl PipelineResult {
  pub(crate) fn success(outcome: RunOutcome, context: PooledContext) -> Self {
    Self {
      outcome,
      error: None,
      context,
    }
  }

  pub(crate) fn failure(error: Arc<HeraldError>, context: PooledContext) -> Self {
    Self {
      outcome: RunOutcome::Failed,
      error: Some(error),
      context,
    }
  }

  pub fn is_successful(&self) -> bool {
    self.outcome.is_successful()
  }

  pub fn outcome(&self) -> RunOutcome {
    self.outcome
  }

  /// The captured failure; `Some` exactly when the run failed.
  pub fn error(&self) -> Option<&Arc<HeraldError>> {
    self.error.as_ref()
  }

  /// Read access to the run context.
  /// The guard MUST be dropped before any `.await` point.
  pub fn context(&self) -> RwLockReadGuard<'_, RunContext> {
    self.context.read()
  }

  /// Shortcut for reading one value out of the run context.
  pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
    self.context.read().get::<T>()
  }

  /// Gives up the result, keeping the context checked out.
  pub fn into_context(self) -> PooledContext {
    self.context
  }
}

impl fmt::Debug for PipelineResult {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PipelineResult")
      .field("outcome", &self.outcome)
      .field("error", &self.error.as_ref().map(|e| e.to_string()))
      .field("context_values", &self.context.read().len())
      .finish()
  }
}
