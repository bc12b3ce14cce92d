// herald/src/core/control.rs

//! Defines signals for controlling pipeline flow and the outcome of a pipeline run.

/// Signal from a step indicating whether the pipeline should continue or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineControl {
  /// Continue with the next step.
  Continue,
  /// Short-circuit: no further steps of this run are executed.
  Stop,
}

/// Outcome of a full pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
  /// Every step ran (or was skipped by its condition).
  Completed,
  /// A step returned `PipelineControl::Stop`, or a wrapper did not call `next`.
  Stopped,
  /// A step failed, a parameter could not be resolved, or the run was cancelled.
  Failed,
}

impl RunOutcome {
  pub fn is_successful(self) -> bool {
    !matches!(self, RunOutcome::Failed)
  }
}

impl From<PipelineControl> for RunOutcome {
  fn from(control: PipelineControl) -> Self {
    match control {
      PipelineControl::Continue => RunOutcome::Completed,
      PipelineControl::Stop => RunOutcome::Stopped,
    }
  }
}
