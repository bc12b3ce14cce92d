// herald/src/core/param.rs

//! Declarations describing where each step parameter comes from, and the
//! resolver that applies them.
//!
//! A step's parameter table is built once with the pipeline. At run time each
//! entry is a direct `TypeId` lookup in the run context and/or the service
//! scope; nothing is cached across runs since context contents vary per run.

use crate::core::run_context::{ContextValue, RunContext};
use crate::error::{HeraldError, HeraldResult};
use crate::services::ServiceScope;
use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Where a parameter is looked up first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSource {
  /// The per-run typed value bag.
  RunContext,
  /// The host's service scope for the current unit of work.
  ExternalScope,
}

impl ParamSource {
  fn other(self) -> Self {
    match self {
      ParamSource::RunContext => ParamSource::ExternalScope,
      ParamSource::ExternalScope => ParamSource::RunContext,
    }
  }
}

type DefaultFactory = Arc<dyn Fn() -> ContextValue + Send + Sync>;

/// What happens when no permitted source has a value.
#[derive(Clone)]
pub enum NotFound {
  Fail,
  UseDefault(DefaultFactory),
}

impl fmt::Debug for NotFound {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      NotFound::Fail => f.write_str("Fail"),
      NotFound::UseDefault(_) => f.write_str("UseDefault"),
    }
  }
}

/// Typed builder for one parameter declaration.
///
/// ```ignore
/// Step::new("charge", handler)
///   .param(Param::<Order>::from_context())
///   .param(Param::<PaymentGateway>::from_scope().with_fallback())
///   .param(Param::<Settings>::from_context().or_default());
/// ```
pub struct Param<T> {
  source: ParamSource,
  allow_fallback: bool,
  not_found: NotFound,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Param<T> {
  pub fn new(source: ParamSource) -> Self {
    Self {
      source,
      allow_fallback: false,
      not_found: NotFound::Fail,
      _marker: PhantomData,
    }
  }

  pub fn from_context() -> Self {
    Self::new(ParamSource::RunContext)
  }

  pub fn from_scope() -> Self {
    Self::new(ParamSource::ExternalScope)
  }

  /// Also try the other source when the primary one has no value.
  pub fn with_fallback(mut self) -> Self {
    self.allow_fallback = true;
    self
  }

  /// Use the value produced by `factory` when no source has one.
  pub fn or_else(mut self, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
    self.not_found = NotFound::UseDefault(Arc::new(move || Arc::new(factory()) as ContextValue));
    self
  }
}

impl<T: Default + Send + Sync + 'static> Param<T> {
  pub fn or_default(self) -> Self {
    self.or_else(T::default)
  }
}

/// The type-erased declaration stored in a step.
#[derive(Clone)]
pub struct ParamSpec {
  pub(crate) type_id: TypeId,
  pub(crate) type_name: &'static str,
  pub(crate) source: ParamSource,
  pub(crate) allow_fallback: bool,
  pub(crate) not_found: NotFound,
}

impl<T: Send + Sync + 'static> From<Param<T>> for ParamSpec {
  fn from(param: Param<T>) -> Self {
    ParamSpec {
      type_id: TypeId::of::<T>(),
      type_name: std::any::type_name::<T>(),
      source: param.source,
      allow_fallback: param.allow_fallback,
      not_found: param.not_found,
    }
  }
}

impl fmt::Debug for ParamSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ParamSpec")
      .field("type_name", &self.type_name)
      .field("source", &self.source)
      .field("allow_fallback", &self.allow_fallback)
      .field("not_found", &self.not_found)
      .finish()
  }
}

impl ParamSpec {
  pub fn type_name(&self) -> &'static str {
    self.type_name
  }

  pub fn source(&self) -> ParamSource {
    self.source
  }

  fn lookup(&self, source: ParamSource, ctx: &RunContext, scope: Option<&dyn ServiceScope>) -> Option<ContextValue> {
    match source {
      ParamSource::RunContext => ctx.get_value(self.type_id),
      ParamSource::ExternalScope => scope.and_then(|scope| scope.resolve_service(self.type_id)),
    }
  }

  fn searched(&self) -> &'static str {
    match (self.source, self.allow_fallback) {
      (ParamSource::RunContext, false) => "run context",
      (ParamSource::ExternalScope, false) => "external scope",
      (ParamSource::RunContext, true) => "run context, external scope",
      (ParamSource::ExternalScope, true) => "external scope, run context",
    }
  }

  /// Primary source, then the fallback source if allowed, then the not-found policy.
  pub(crate) fn resolve(
    &self,
    step_name: &str,
    ctx: &RunContext,
    scope: Option<&dyn ServiceScope>,
  ) -> HeraldResult<ContextValue> {
    if let Some(value) = self.lookup(self.source, ctx, scope) {
      return Ok(value);
    }
    if self.allow_fallback {
      if let Some(value) = self.lookup(self.source.other(), ctx, scope) {
        return Ok(value);
      }
    }
    match &self.not_found {
      NotFound::UseDefault(factory) => Ok(factory()),
      NotFound::Fail => Err(HeraldError::ParameterResolution {
        step_name: step_name.to_string(),
        type_name: self.type_name,
        searched: self.searched(),
      }),
    }
  }
}

/// Resolves a whole parameter table against one run context.
pub(crate) fn resolve_params(
  step_name: &str,
  params: &[ParamSpec],
  ctx: &RunContext,
  scope: Option<&dyn ServiceScope>,
) -> HeraldResult<Vec<(TypeId, ContextValue)>> {
  params
    .iter()
    .map(|spec| spec.resolve(step_name, ctx, scope).map(|value| (spec.type_id, value)))
    .collect()
}
