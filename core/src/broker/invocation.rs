// herald/src/broker/invocation.rs

use crate::core::run_context::ContextValue;
use crate::pool::Recycle;
use crate::retry::RetryPolicy;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

/// State of one handler invocation attempt: the type-erased event, the
/// chain's retry policy, the cancellation token and the concurrency permit.
///
/// Pooled by the broker. Recycling drops every handle it holds, which also
/// releases the permit.
#[derive(Default)]
pub struct Invocation {
  event: Option<ContextValue>,
  event_type: &'static str,
  registration: usize,
  retry: Option<RetryPolicy>,
  cancellation: Option<CancellationToken>,
  permit: Option<OwnedSemaphorePermit>,
}

impl Invocation {
  pub(crate) fn begin<E: Send + Sync + 'static>(
    &mut self,
    event: Arc<E>,
    registration: usize,
    retry: RetryPolicy,
    cancellation: CancellationToken,
    permit: Option<OwnedSemaphorePermit>,
  ) {
    self.event = Some(event);
    self.event_type = std::any::type_name::<E>();
    self.registration = registration;
    self.retry = Some(retry);
    self.cancellation = Some(cancellation);
    self.permit = permit;
  }

  pub fn event<E: Send + Sync + 'static>(&self) -> Option<Arc<E>> {
    self.event.clone().and_then(|value| value.downcast::<E>().ok())
  }

  pub fn event_type(&self) -> &'static str {
    self.event_type
  }

  /// Position of the registration in the dispatch snapshot.
  pub fn registration(&self) -> usize {
    self.registration
  }

  pub fn retry(&self) -> Option<&RetryPolicy> {
    self.retry.as_ref()
  }

  pub fn attempt(&self) -> u32 {
    self.retry.as_ref().map_or(1, RetryPolicy::attempt)
  }

  pub fn cancellation(&self) -> CancellationToken {
    self.cancellation.clone().unwrap_or_default()
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled)
  }

  pub fn holds_permit(&self) -> bool {
    self.permit.is_some()
  }
}

impl Recycle for Invocation {
  fn recycle(&mut self) -> bool {
    self.event = None;
    self.event_type = "";
    self.registration = 0;
    self.retry = None;
    self.cancellation = None;
    self.permit = None;
    true
  }
}

impl fmt::Debug for Invocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Invocation")
      .field("event_type", &self.event_type)
      .field("registration", &self.registration)
      .field("attempt", &self.attempt())
      .field("cancelled", &self.is_cancelled())
      .field("holds_permit", &self.holds_permit())
      .finish()
  }
}
