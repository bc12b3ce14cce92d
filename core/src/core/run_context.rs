// herald/src/core/run_context.rs

//! The typed value bag shared by all steps of one pipeline run.

use crate::core::context_data::ContextData;
use crate::error::HeraldError;
use crate::pool::Recycle;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A type-erased value stored in a [`RunContext`] or provided by a service scope.
pub type ContextValue = Arc<dyn Any + Send + Sync>;

/// Mutable mapping from type to a single value, plus an error slot.
///
/// Holds at most one value per distinct type, which is what makes
/// parameter resolution by type unambiguous.
#[derive(Default)]
pub struct RunContext {
  values: HashMap<TypeId, ContextValue>,
  error: Option<Arc<HeraldError>>,
}

impl RunContext {
  pub fn new() -> Self {
    Self::default()
  }

  /// Stores `value`, returning the value of the same type it replaced, if any.
  pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<Arc<T>> {
    self.insert_arc(Arc::new(value))
  }

  pub fn insert_arc<T: Send + Sync + 'static>(&mut self, value: Arc<T>) -> Option<Arc<T>> {
    self
      .values
      .insert(TypeId::of::<T>(), value)
      .and_then(|previous| previous.downcast::<T>().ok())
  }

  pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
    self.get_value(TypeId::of::<T>()).and_then(|value| value.downcast::<T>().ok())
  }

  pub fn get_ref<T: Send + Sync + 'static>(&self) -> Option<&T> {
    self.values.get(&TypeId::of::<T>()).and_then(|value| (**value).downcast_ref::<T>())
  }

  pub(crate) fn get_value(&self, type_id: TypeId) -> Option<ContextValue> {
    self.values.get(&type_id).cloned()
  }

  pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
    self.values.contains_key(&TypeId::of::<T>())
  }

  pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<Arc<T>> {
    self
      .values
      .remove(&TypeId::of::<T>())
      .and_then(|value| value.downcast::<T>().ok())
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  /// The failure captured when the run ended unsuccessfully.
  pub fn error(&self) -> Option<&Arc<HeraldError>> {
    self.error.as_ref()
  }

  pub(crate) fn set_error(&mut self, error: Arc<HeraldError>) {
    self.error = Some(error);
  }

  /// Removes every value and the captured error. Keeps the allocated capacity.
  pub fn clear(&mut self) {
    self.values.clear();
    self.error = None;
  }
}

impl fmt::Debug for RunContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RunContext")
      .field("values", &self.values.len())
      .field("error", &self.error.as_ref().map(|e| e.to_string()))
      .finish()
  }
}

// A context still referenced by someone else (e.g. a handle moved into a
// spawned task) is dropped instead of being handed to the next run.
impl Recycle for ContextData<RunContext> {
  fn recycle(&mut self) -> bool {
    match self.get_mut() {
      Some(ctx) => {
        ctx.clear();
        true
      }
      None => false,
    }
  }
}
