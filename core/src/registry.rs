// herald/src/registry.rs

//! Defines the `HandlerRegistry`, a type-keyed registry of event registrations.
//!
//! Each event type maps to an immutable snapshot (`Arc<[..]>`) that is
//! replaced wholesale on add/remove. Dispatch clones the `Arc` and iterates a
//! stable snapshot while registrations keep changing underneath.

use crate::broker::handler::Event;
use crate::broker::registration::Registration;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{event, Level};

/// Opaque handle identifying one registration, used to remove it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClaimTicket(u64);

#[derive(Clone)]
pub(crate) struct RegistryEntry {
  pub(crate) ticket: ClaimTicket,
  // Always an `Arc<Registration<E>>` for the `E` this entry is keyed by.
  registration: Arc<dyn Any + Send + Sync>,
}

impl RegistryEntry {
  pub(crate) fn downcast<E: Event>(&self) -> Option<Arc<Registration<E>>> {
    Arc::clone(&self.registration).downcast::<Registration<E>>().ok()
  }
}

pub(crate) type Snapshot = Arc<[RegistryEntry]>;

#[derive(Default)]
struct RegistryState {
  by_type: HashMap<TypeId, Snapshot>,
  tickets: HashMap<ClaimTicket, TypeId>,
}

/// Registrations keyed by exact event type.
#[derive(Default)]
pub struct HandlerRegistry {
  state: RwLock<RegistryState>,
  next_ticket: AtomicU64,
}

impl HandlerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add<E: Event>(&self, registration: Registration<E>) -> ClaimTicket {
    let ticket = ClaimTicket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
    let type_id = TypeId::of::<E>();
    let entry = RegistryEntry {
      ticket,
      registration: Arc::new(registration),
    };

    let mut state = self.state.write();
    let updated: Snapshot = match state.by_type.get(&type_id) {
      Some(current) => current.iter().cloned().chain(std::iter::once(entry)).collect(),
      None => Arc::from(vec![entry]),
    };
    let count = updated.len();
    state.by_type.insert(type_id, updated);
    state.tickets.insert(ticket, type_id);
    drop(state);

    event!(Level::DEBUG, event_type = %std::any::type_name::<E>(), ?ticket, count, "Registration added.");
    ticket
  }

  /// Removes one registration. Returns false for unknown (or already removed) tickets.
  pub fn remove(&self, ticket: ClaimTicket) -> bool {
    let mut state = self.state.write();
    let Some(type_id) = state.tickets.remove(&ticket) else {
      return false;
    };
    let remaining: Option<Snapshot> = state.by_type.get(&type_id).map(|current| {
      current
        .iter()
        .filter(|entry| entry.ticket != ticket)
        .cloned()
        .collect()
    });
    match remaining {
      Some(entries) if !entries.is_empty() => {
        state.by_type.insert(type_id, entries);
      }
      _ => {
        state.by_type.remove(&type_id);
      }
    }
    drop(state);

    event!(Level::DEBUG, ?ticket, "Registration removed.");
    true
  }

  /// Removes every listed registration, returning how many were found.
  pub fn remove_range(&self, tickets: impl IntoIterator<Item = ClaimTicket>) -> usize {
    tickets.into_iter().filter(|ticket| self.remove(*ticket)).count()
  }

  /// Number of registrations for exactly `E`.
  pub fn count<E: Event>(&self) -> usize {
    self
      .state
      .read()
      .by_type
      .get(&TypeId::of::<E>())
      .map_or(0, |entries| entries.len())
  }

  pub fn is_empty(&self) -> bool {
    self.state.read().tickets.is_empty()
  }

  /// The current registrations for exactly `E` (no covariance).
  pub(crate) fn snapshot<E: Event>(&self) -> Option<Snapshot> {
    self.state.read().by_type.get(&TypeId::of::<E>()).cloned()
  }
}

impl fmt::Debug for HandlerRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.read();
    f.debug_struct("HandlerRegistry")
      .field("event_types", &state.by_type.len())
      .field("registrations", &state.tickets.len())
      .finish()
  }
}
