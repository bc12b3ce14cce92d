// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use herald::{PipelineControl, StepArgs, Step};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use tracing::Level;

// --- Common Event and Context Value Types ---
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Greeting(pub String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderPlaced {
  pub order_id: u64,
}

/// Trail of step names written into the run context by the helper steps.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Trail(pub Vec<String>);

// --- Common Error Type for Tests ---
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TestError {
  #[error("Test handler failed: {0}")]
  Handler(String),

  #[error("Test step failed: {0}")]
  Step(String),
}

// --- Common Step Creators ---

/// A step appending `step_name` to the `Trail` in the run context.
pub fn trail_step(step_name: &'static str) -> Step {
  Step::new(step_name, move |args: StepArgs| async move {
    let mut guard = args.context().write();
    let mut trail = guard.get_ref::<Trail>().cloned().unwrap_or_default();
    trail.0.push(step_name.to_string());
    guard.insert(trail);
    tracing::debug!(target: "test_steps", step = step_name, "executed");
    Ok::<_, anyhow::Error>(PipelineControl::Continue)
  })
}

/// A step that records itself in the trail, then fails.
pub fn failing_step(step_name: &'static str, error_message: &'static str) -> Step {
  Step::new(step_name, move |args: StepArgs| async move {
    {
      let mut guard = args.context().write();
      let mut trail = guard.get_ref::<Trail>().cloned().unwrap_or_default();
      trail.0.push(step_name.to_string());
      guard.insert(trail);
    }
    tracing::warn!(target: "test_steps", step = step_name, "failing with: '{}'", error_message);
    Err::<PipelineControl, _>(TestError::Step(error_message.to_string()))
  })
}

pub fn trail_of(ctx: &herald::RunContext) -> Vec<String> {
  ctx.get_ref::<Trail>().map(|t| t.0.clone()).unwrap_or_default()
}

// --- Helper for Tracing Setup (call once per test run if needed) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer() // Important for tests to capture output
    .try_init()
    .ok(); // Allow multiple initializations in tests (ok if fails)
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

// --- Atomic counters for checking execution counts ---
pub static HANDLER_EXEC_COUNTER: Lazy<Arc<AtomicUsize>> = Lazy::new(|| Arc::new(AtomicUsize::new(0)));
pub static ERROR_HOOK_COUNTER: Lazy<Arc<AtomicUsize>> = Lazy::new(|| Arc::new(AtomicUsize::new(0)));

pub fn reset_counters() {
  HANDLER_EXEC_COUNTER.store(0, Ordering::SeqCst);
  ERROR_HOOK_COUNTER.store(0, Ordering::SeqCst);
}

/// Polls `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until(timeout: std::time::Duration, condition: impl Fn() -> bool) -> bool {
  let deadline = tokio::time::Instant::now() + timeout;
  while tokio::time::Instant::now() < deadline {
    if condition() {
      return true;
    }
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
  }
  condition()
}
