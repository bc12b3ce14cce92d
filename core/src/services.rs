// herald/src/services.rs

//! The host-facing service scope seam.
//!
//! The pipeline engine only needs two things from a host container: resolving
//! a typed service inside a scope, and creating a scope per unit of work
//! (disposed on drop). `ServiceCollection` is a small container implementing both.

use crate::core::run_context::ContextValue;
use parking_lot::Mutex;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{event, Level};

/// Resolves services for one unit of work.
pub trait ServiceScope: Send + Sync {
  fn resolve_service(&self, type_id: TypeId) -> Option<ContextValue>;
}

/// Creates a fresh [`ServiceScope`] per invocation.
pub trait ScopeFactory: Send + Sync {
  fn create_scope(&self) -> Arc<dyn ServiceScope>;
}

impl<'a> dyn ServiceScope + 'a {
  pub fn resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
    self
      .resolve_service(TypeId::of::<T>())
      .and_then(|value| value.downcast::<T>().ok())
  }
}

type ServiceFactory = Arc<dyn Fn() -> ContextValue + Send + Sync>;

#[derive(Default)]
struct Registrations {
  singletons: HashMap<TypeId, ContextValue>,
  scoped: HashMap<TypeId, ServiceFactory>,
}

/// Singletons shared by every scope, plus scoped services created lazily
/// once per scope.
#[derive(Clone, Default)]
pub struct ServiceCollection {
  inner: Arc<Registrations>,
}

impl ServiceCollection {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn singleton<T: Send + Sync + 'static>(self, value: T) -> Self {
    self.with_registrations(|regs| {
      regs.singletons.insert(TypeId::of::<T>(), Arc::new(value));
    })
  }

  pub fn scoped<T, F>(self, factory: F) -> Self
  where
    T: Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
  {
    self.with_registrations(|regs| {
      regs
        .scoped
        .insert(TypeId::of::<T>(), Arc::new(move || Arc::new(factory()) as ContextValue));
    })
  }

  fn with_registrations(self, f: impl FnOnce(&mut Registrations)) -> Self {
    let mut regs = match Arc::try_unwrap(self.inner) {
      Ok(regs) => regs,
      Err(shared) => Registrations {
        singletons: shared.singletons.clone(),
        scoped: shared.scoped.clone(),
      },
    };
    f(&mut regs);
    Self { inner: Arc::new(regs) }
  }
}

impl fmt::Debug for ServiceCollection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ServiceCollection")
      .field("singletons", &self.inner.singletons.len())
      .field("scoped", &self.inner.scoped.len())
      .finish()
  }
}

impl ScopeFactory for ServiceCollection {
  fn create_scope(&self) -> Arc<dyn ServiceScope> {
    Arc::new(CollectionScope {
      registrations: Arc::clone(&self.inner),
      instances: Mutex::new(HashMap::new()),
    })
  }
}

struct CollectionScope {
  registrations: Arc<Registrations>,
  instances: Mutex<HashMap<TypeId, ContextValue>>,
}

impl ServiceScope for CollectionScope {
  fn resolve_service(&self, type_id: TypeId) -> Option<ContextValue> {
    if let Some(value) = self.registrations.singletons.get(&type_id) {
      return Some(Arc::clone(value));
    }
    let factory = self.registrations.scoped.get(&type_id)?;
    let mut instances = self.instances.lock();
    let value = instances.entry(type_id).or_insert_with(|| factory());
    Some(Arc::clone(value))
  }
}

impl Drop for CollectionScope {
  fn drop(&mut self) {
    event!(Level::TRACE, instances = self.instances.get_mut().len(), "Service scope disposed.");
  }
}
