// herald/src/retry/policy.rs

//! Retry configuration (per registration) and retry state (per invocation chain).

use crate::error::{HeraldError, HeraldResult};
use crate::pool::Recycle;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long to wait before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
  /// delay = d
  Fixed(Duration),
  /// delay = min(initial * multiplier^retry, max)
  Exponential {
    initial: Duration,
    multiplier: u32,
    max: Duration,
  },
}

impl Backoff {
  /// Delay before retry number `retry` (0 for the first retry).
  pub fn delay_for(&self, retry: u32) -> Duration {
    match *self {
      Backoff::Fixed(delay) => delay,
      Backoff::Exponential { initial, multiplier, max } => {
        let factor = multiplier.max(1).checked_pow(retry).unwrap_or(u32::MAX);
        initial.checked_mul(factor).map_or(max, |delay| delay.min(max))
      }
    }
  }
}

impl Default for Backoff {
  fn default() -> Self {
    Backoff::Exponential {
      initial: Duration::from_millis(100),
      multiplier: 2,
      max: Duration::from_secs(10),
    }
  }
}

/// Who decides that a failed invocation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryMode {
  /// The broker requests a retry with the configured backoff after every
  /// failure; the error hook only runs once retries are used up.
  #[default]
  Automatic,
  /// The error hook runs after every failure and calls
  /// `RetryPolicy::request_retry` itself when it wants another attempt.
  OnRequest,
}

/// Retry settings supplied per registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
  /// Attempts allowed after the first one.
  pub max_retries: u32,
  pub backoff: Backoff,
  pub mode: RetryMode,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      backoff: Backoff::default(),
      mode: RetryMode::Automatic,
    }
  }
}

impl RetryConfig {
  /// No retries at all; the first failure goes straight to the error hook.
  pub fn none() -> Self {
    Self {
      max_retries: 0,
      backoff: Backoff::Fixed(Duration::ZERO),
      mode: RetryMode::Automatic,
    }
  }

  pub fn fixed(max_retries: u32, delay: Duration) -> Self {
    Self {
      max_retries,
      backoff: Backoff::Fixed(delay),
      mode: RetryMode::Automatic,
    }
  }

  pub fn exponential(max_retries: u32, initial: Duration, max: Duration) -> Self {
    Self {
      max_retries,
      backoff: Backoff::Exponential {
        initial,
        multiplier: 2,
        max,
      },
      mode: RetryMode::Automatic,
    }
  }

  pub fn on_request(mut self) -> Self {
    self.mode = RetryMode::OnRequest;
    self
  }

  /// Total attempts including the first one.
  pub fn max_attempts(&self) -> u32 {
    self.max_retries.saturating_add(1)
  }

  pub fn is_automatic(&self) -> bool {
    self.mode == RetryMode::Automatic
  }

  pub fn delay_for(&self, retry: u32) -> Duration {
    self.backoff.delay_for(retry)
  }
}

#[derive(Debug)]
struct RetryState {
  retries: AtomicU32,
  max_attempts: AtomicU32,
  requested: Mutex<Option<Duration>>,
}

impl RetryState {
  fn new(max_attempts: u32) -> Self {
    Self {
      retries: AtomicU32::new(0),
      max_attempts: AtomicU32::new(max_attempts.max(1)),
      requested: Mutex::new(None),
    }
  }
}

/// Retry state of one invocation chain, shared with the handler.
///
/// Cloning yields another handle to the same state. The counter only grows
/// within a chain and never passes `max_attempts`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  state: Arc<RetryState>,
}

impl RetryPolicy {
  pub fn new(max_attempts: u32) -> Self {
    Self {
      state: Arc::new(RetryState::new(max_attempts)),
    }
  }

  pub(crate) fn configure(&self, max_attempts: u32) {
    self.state.max_attempts.store(max_attempts.max(1), Ordering::SeqCst);
  }

  /// Asks for another attempt after `delay`.
  ///
  /// Fails with `RetryExhausted` when another attempt would exceed the
  /// maximum; with `max_attempts = N` exactly `N - 1` requests succeed.
  pub fn request_retry(&self, delay: Duration) -> HeraldResult<()> {
    let max_attempts = self.max_attempts();
    self
      .state
      .retries
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |retries| {
        (retries + 1 < max_attempts).then_some(retries + 1)
      })
      .map_err(|_| HeraldError::RetryExhausted {
        max_attempts,
        last_error: None,
      })?;
    *self.state.requested.lock() = Some(delay);
    Ok(())
  }

  /// Retries granted so far in this chain.
  pub fn retries(&self) -> u32 {
    self.state.retries.load(Ordering::SeqCst)
  }

  /// The 1-based number of the current attempt.
  pub fn attempt(&self) -> u32 {
    self.retries() + 1
  }

  pub fn max_attempts(&self) -> u32 {
    self.state.max_attempts.load(Ordering::SeqCst)
  }

  pub fn remaining(&self) -> u32 {
    self.max_attempts().saturating_sub(self.attempt())
  }

  pub fn is_exhausted(&self) -> bool {
    self.remaining() == 0
  }

  /// Takes the delay of a granted, not yet scheduled retry request.
  pub(crate) fn take_requested(&self) -> Option<Duration> {
    self.state.requested.lock().take()
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::new(1)
  }
}

impl Recycle for RetryPolicy {
  fn recycle(&mut self) -> bool {
    match Arc::get_mut(&mut self.state) {
      Some(state) => {
        *state.retries.get_mut() = 0;
        *state.max_attempts.get_mut() = 1;
        *state.requested.get_mut() = None;
        true
      }
      None => false,
    }
  }
}
