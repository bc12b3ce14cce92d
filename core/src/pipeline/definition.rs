// herald/src/pipeline/definition.rs

//! Contains the `Pipeline` struct and the `PipelineBuilder` used to assemble it.
//!
//! A pipeline is assembled once and frozen by `build()`; there is no
//! mutation afterwards, so one `Arc<Pipeline>` can serve many concurrent runs.

use crate::core::context_data::ContextData;
use crate::core::run_context::RunContext;
use crate::core::step::{SkipCondition, Step};
use crate::error::{HeraldError, HeraldResult};
use crate::pool::{Pool, Pooled};
use std::fmt;
use std::sync::Arc;
use tracing::{event, Level};

/// A run context checked out from a pool for one run.
pub type PooledContext = Pooled<ContextData<RunContext>>;

pub(crate) const DEFAULT_CONTEXT_POOL_CAPACITY: usize = 64;

pub(crate) fn new_context_pool(capacity: usize) -> Pool<ContextData<RunContext>> {
  Pool::new(capacity, || ContextData::new(RunContext::new()))
}

/// An immutable, ordered sequence of steps.
pub struct Pipeline {
  pub(crate) name: Arc<str>,
  pub(crate) steps: Arc<[Step]>,
  pub(crate) contexts: Pool<ContextData<RunContext>>,
}

impl Pipeline {
  pub fn builder(name: impl Into<String>) -> PipelineBuilder {
    PipelineBuilder::new(name)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  pub fn step_names(&self) -> impl Iterator<Item = &str> {
    self.steps.iter().map(|s| s.name())
  }

  /// The pool `run()` and `run_in()` take their contexts from.
  pub fn context_pool(&self) -> &Pool<ContextData<RunContext>> {
    &self.contexts
  }

  /// Checks out an empty run context, e.g. to seed values before `run_with`.
  pub fn acquire_context(&self) -> PooledContext {
    self.contexts.acquire()
  }
}

impl fmt::Debug for Pipeline {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Pipeline")
      .field("name", &self.name)
      .field("steps", &self.steps)
      .finish()
  }
}

/// Assembles a [`Pipeline`].
///
/// Manipulation methods naming an unknown step do not panic; the problem is
/// recorded and reported by `build()`.
pub struct PipelineBuilder {
  name: String,
  steps: Vec<Step>,
  context_pool_capacity: usize,
  setup_error: Option<HeraldError>,
}

impl PipelineBuilder {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      steps: Vec::new(),
      context_pool_capacity: DEFAULT_CONTEXT_POOL_CAPACITY,
      setup_error: None,
    }
  }

  /// Appends a step.
  pub fn step(mut self, step: Step) -> Self {
    self.steps.push(step);
    self
  }

  pub fn context_pool_capacity(mut self, capacity: usize) -> Self {
    self.context_pool_capacity = capacity;
    self
  }

  fn position(&mut self, step_name: &str) -> Option<usize> {
    let idx = self.steps.iter().position(|s| s.name() == step_name);
    if idx.is_none() && self.setup_error.is_none() {
      self.setup_error = Some(HeraldError::ConfigurationError {
        step_name: step_name.to_string(),
        message: format!("step not found in pipeline '{}'", self.name),
      });
    }
    idx
  }

  pub fn insert_before(mut self, existing_step_name: &str, step: Step) -> Self {
    if let Some(idx) = self.position(existing_step_name) {
      self.steps.insert(idx, step);
    }
    self
  }

  pub fn insert_after(mut self, existing_step_name: &str, step: Step) -> Self {
    if let Some(idx) = self.position(existing_step_name) {
      self.steps.insert(idx + 1, step);
    }
    self
  }

  pub fn remove_step(mut self, step_name: &str) -> Self {
    if let Some(idx) = self.position(step_name) {
      self.steps.remove(idx);
    }
    self
  }

  pub fn set_skip_condition(mut self, step_name: &str, skip_if: Option<SkipCondition>) -> Self {
    if let Some(idx) = self.position(step_name) {
      self.steps[idx].skip_if = skip_if;
    }
    self
  }

  /// Validates and freezes the pipeline.
  ///
  /// Fails on: manipulation of unknown steps, an empty pipeline, duplicate
  /// step names, and duplicate parameter bindings within one step.
  pub fn build(self) -> HeraldResult<Pipeline> {
    if let Some(err) = self.setup_error {
      return Err(err);
    }
    if self.steps.is_empty() {
      return Err(HeraldError::ConfigurationError {
        step_name: String::from("<none>"),
        message: format!("pipeline '{}' has no steps", self.name),
      });
    }
    for (idx, step) in self.steps.iter().enumerate() {
      if self.steps[..idx].iter().any(|s| s.name == step.name) {
        return Err(HeraldError::ConfigurationError {
          step_name: step.name().to_string(),
          message: format!("step already exists in pipeline '{}'", self.name),
        });
      }
      step.check_params()?;
    }

    event!(Level::DEBUG, pipeline = %self.name, num_steps = self.steps.len(), "Pipeline built.");
    Ok(Pipeline {
      name: Arc::from(self.name),
      steps: Arc::from(self.steps),
      contexts: new_context_pool(self.context_pool_capacity),
    })
  }
}

impl fmt::Debug for PipelineBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PipelineBuilder")
      .field("name", &self.name)
      .field("steps", &self.steps)
      .finish()
  }
}
