// herald/src/pool.rs

//! Free-list object pools for the per-run and per-invocation state.
//!
//! A pool never fails the caller: when the free list is empty a fresh object
//! is created, and when it is full a returned object is simply dropped.

use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{event, Level};

/// Implemented by every pooled type.
pub trait Recycle: Send + 'static {
  /// Clears all mutable state before the object becomes eligible for reuse.
  ///
  /// Returns `false` when the object can not be reused safely; it is then
  /// dropped instead of going back to the free list.
  fn recycle(&mut self) -> bool;
}

/// Counters describing how a pool has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
  pub created: usize,
  pub reused: usize,
  pub returned: usize,
  pub discarded: usize,
}

struct PoolShared<T: Recycle> {
  free: Mutex<Vec<T>>,
  capacity: usize,
  create: Box<dyn Fn() -> T + Send + Sync>,
  created: AtomicUsize,
  reused: AtomicUsize,
  returned: AtomicUsize,
  discarded: AtomicUsize,
}

impl<T: Recycle> PoolShared<T> {
  fn release(&self, mut value: T) {
    if !value.recycle() {
      self.discarded.fetch_add(1, Ordering::Relaxed);
      event!(Level::TRACE, pooled_type = %std::any::type_name::<T>(), "Pooled object still in use elsewhere, discarding.");
      return;
    }
    let mut free = self.free.lock();
    if free.len() < self.capacity {
      free.push(value);
      self.returned.fetch_add(1, Ordering::Relaxed);
    } else {
      drop(free);
      self.discarded.fetch_add(1, Ordering::Relaxed);
    }
  }
}

/// A bounded free list of `T` with a creation function.
pub struct Pool<T: Recycle> {
  shared: Arc<PoolShared<T>>,
}

impl<T: Recycle> Pool<T> {
  pub fn new(capacity: usize, create: impl Fn() -> T + Send + Sync + 'static) -> Self {
    Self {
      shared: Arc::new(PoolShared {
        free: Mutex::new(Vec::with_capacity(capacity.min(64))),
        capacity,
        create: Box::new(create),
        created: AtomicUsize::new(0),
        reused: AtomicUsize::new(0),
        returned: AtomicUsize::new(0),
        discarded: AtomicUsize::new(0),
      }),
    }
  }

  /// Takes an object from the free list, or creates one if the list is empty.
  pub fn acquire(&self) -> Pooled<T> {
    let recycled = self.shared.free.lock().pop();
    let value = match recycled {
      Some(value) => {
        self.shared.reused.fetch_add(1, Ordering::Relaxed);
        value
      }
      None => {
        self.shared.created.fetch_add(1, Ordering::Relaxed);
        (self.shared.create)()
      }
    };
    Pooled {
      value: Some(value),
      pool: Arc::clone(&self.shared),
    }
  }

  /// Number of objects currently waiting on the free list.
  pub fn available(&self) -> usize {
    self.shared.free.lock().len()
  }

  pub fn capacity(&self) -> usize {
    self.shared.capacity
  }

  pub fn stats(&self) -> PoolStats {
    PoolStats {
      created: self.shared.created.load(Ordering::Relaxed),
      reused: self.shared.reused.load(Ordering::Relaxed),
      returned: self.shared.returned.load(Ordering::Relaxed),
      discarded: self.shared.discarded.load(Ordering::Relaxed),
    }
  }
}

impl<T: Recycle + Default> Pool<T> {
  pub fn with_default(capacity: usize) -> Self {
    Self::new(capacity, T::default)
  }
}

impl<T: Recycle> Clone for Pool<T> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<T: Recycle> fmt::Debug for Pool<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Pool")
      .field("type", &std::any::type_name::<T>())
      .field("capacity", &self.shared.capacity)
      .field("stats", &self.stats())
      .finish()
  }
}

/// Exclusive ownership of a pooled object for one acquisition.
///
/// The object goes back to its pool exactly once, when the guard is dropped.
pub struct Pooled<T: Recycle> {
  // Only `None` after `detach` or during drop.
  value: Option<T>,
  pool: Arc<PoolShared<T>>,
}

impl<T: Recycle> Pooled<T> {
  /// Takes the object out of the pool's lifecycle; it will not be returned.
  pub fn detach(mut self) -> T {
    self.pool.discarded.fetch_add(1, Ordering::Relaxed);
    self.value.take().expect("pooled value is present until drop")
  }
}

impl<T: Recycle> Deref for Pooled<T> {
  type Target = T;

  fn deref(&self) -> &T {
    self.value.as_ref().expect("pooled value is present until drop")
  }
}

impl<T: Recycle> DerefMut for Pooled<T> {
  fn deref_mut(&mut self) -> &mut T {
    self.value.as_mut().expect("pooled value is present until drop")
  }
}

impl<T: Recycle> Drop for Pooled<T> {
  fn drop(&mut self) {
    if let Some(value) = self.value.take() {
      self.pool.release(value);
    }
  }
}

impl<T: Recycle + fmt::Debug> fmt::Debug for Pooled<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("Pooled").field(&self.value).finish()
  }
}
