// herald/src/core/context_data.rs
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

/// The lock handle every step of a run shares: cloning yields another handle
/// to the same `parking_lot::RwLock`.
///
/// Guards are blocking; drop them before the next `.await`.
#[derive(Debug)]
pub struct ContextData<T: Send + Sync + 'static>(Arc<RwLock<T>>);

impl<T: Send + Sync + 'static> ContextData<T> {
  pub fn new(data: T) -> Self {
    ContextData(Arc::new(RwLock::new(data)))
  }

  pub fn read(&self) -> RwLockReadGuard<'_, T> {
    self.0.read()
  }

  pub fn write(&self) -> RwLockWriteGuard<'_, T> {
    self.0.write()
  }

  /// Lock-free mutable access, `None` while any other handle is alive.
  /// Pool recycling relies on this to detect leaked handles.
  pub fn get_mut(&mut self) -> Option<&mut T> {
    Arc::get_mut(&mut self.0).map(|lock| lock.get_mut())
  }
}

impl<T: Send + Sync + 'static> Clone for ContextData<T> {
  fn clone(&self) -> Self {
    ContextData(Arc::clone(&self.0))
  }
}
