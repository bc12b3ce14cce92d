// tests/pipeline_execution_tests.rs
mod common; // Reference the common module

use common::*;
use herald::{HeraldError, Pipeline, PipelineControl, RunEnv, RunOutcome, Step, StepArgs};
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
#[serial]
async fn test_pipeline_runs_steps_in_order() {
  setup_tracing();
  let pipeline = Pipeline::builder("ordered")
    .step(trail_step("step1"))
    .step(trail_step("step2"))
    .step(trail_step("step3"))
    .build()
    .unwrap();

  let result = pipeline.run().await;

  assert!(result.is_successful());
  assert_eq!(result.outcome(), RunOutcome::Completed);
  assert!(result.error().is_none());
  assert_eq!(trail_of(&result.context()), vec!["step1", "step2", "step3"]);
}

#[tokio::test]
#[serial]
async fn test_pipeline_stops_on_pipeline_control_stop() {
  setup_tracing();
  let pipeline = Pipeline::builder("stopping")
    .step(trail_step("stepA"))
    .on("stopStep", |args: StepArgs| async move {
      args.context().write().insert(Trail(vec!["stepA".into(), "stopStep".into()]));
      Ok::<_, anyhow::Error>(PipelineControl::Stop)
    })
    .step(trail_step("stepC")) // This should not run
    .build()
    .unwrap();

  let result = pipeline.run().await;

  assert!(result.is_successful());
  assert_eq!(result.outcome(), RunOutcome::Stopped);
  assert_eq!(trail_of(&result.context()), vec!["stepA", "stopStep"]);
}

#[tokio::test]
#[serial]
async fn test_pipeline_captures_step_error_without_failing_the_call() {
  setup_tracing();
  let pipeline = Pipeline::builder("failing")
    .step(trail_step("good_step"))
    .step(failing_step("bad_step", "I am a bad step!"))
    .step(trail_step("another_step"))
    .build()
    .unwrap();

  let result = pipeline.run().await;

  assert!(!result.is_successful());
  assert_eq!(result.outcome(), RunOutcome::Failed);
  match result.error().map(|e| e.as_ref()) {
    Some(HeraldError::Handler { step_name, source }) => {
      assert_eq!(step_name, "bad_step");
      assert_eq!(
        source.downcast_ref::<TestError>(),
        Some(&TestError::Step("I am a bad step!".to_string()))
      );
    }
    other => panic!("Expected HeraldError::Handler, got {:?}", other),
  }

  let ctx = result.context();
  assert_eq!(trail_of(&ctx), vec!["good_step", "bad_step"]);
  assert!(ctx.error().is_some(), "error slot should hold the failure");
}

#[tokio::test]
#[serial]
async fn test_wrapper_step_runs_remaining_steps_inside() {
  setup_tracing();
  let pipeline = Pipeline::builder("wrapped")
    .around("timing", |args: StepArgs, next| async move {
      {
        let mut guard = args.context().write();
        guard.insert(Trail(vec!["timing:before".into()]));
      }
      let control = next.run().await?;
      let mut guard = args.context().write();
      let mut trail = guard.get_ref::<Trail>().cloned().unwrap_or_default();
      trail.0.push("timing:after".into());
      guard.insert(trail);
      Ok::<_, anyhow::Error>(control)
    })
    .step(trail_step("inner1"))
    .step(trail_step("inner2"))
    .build()
    .unwrap();

  let result = pipeline.run().await;

  assert_eq!(result.outcome(), RunOutcome::Completed);
  assert_eq!(
    trail_of(&result.context()),
    vec!["timing:before", "inner1", "inner2", "timing:after"]
  );
}

#[tokio::test]
#[serial]
async fn test_wrapper_step_can_short_circuit() {
  setup_tracing();
  let inner_runs = Arc::new(AtomicUsize::new(0));
  let inner_runs_clone = inner_runs.clone();

  let pipeline = Pipeline::builder("guarded")
    .around("guard", |_args: StepArgs, next| async move {
      assert_eq!(next.remaining(), 1);
      // Not calling next.run() skips everything after the wrapper.
      Ok::<_, anyhow::Error>(PipelineControl::Stop)
    })
    .on("never", move |_args: StepArgs| {
      let counter = inner_runs_clone.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<_, anyhow::Error>(PipelineControl::Continue)
      }
    })
    .build()
    .unwrap();

  let result = pipeline.run().await;

  assert_eq!(result.outcome(), RunOutcome::Stopped);
  assert_eq!(inner_runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
#[serial]
async fn test_error_inside_wrapped_steps_is_not_double_wrapped() {
  setup_tracing();
  let pipeline = Pipeline::builder("wrapped_failure")
    .around("outer", |_args: StepArgs, next| async move {
      let control = next.run().await?;
      Ok::<_, anyhow::Error>(control)
    })
    .step(failing_step("inner_bad", "inner failure"))
    .build()
    .unwrap();

  let result = pipeline.run().await;

  match result.error().map(|e| e.as_ref()) {
    Some(HeraldError::Handler { step_name, .. }) => assert_eq!(step_name, "inner_bad"),
    other => panic!("Expected the inner step's Handler error, got {:?}", other),
  }
}

#[tokio::test]
#[serial]
async fn test_skip_condition_skips_step() {
  setup_tracing();
  let pipeline = Pipeline::builder("skipping")
    .step(trail_step("first"))
    .step(trail_step("skipped").skip_if(|ctx| ctx.contains::<Trail>()))
    .step(trail_step("last"))
    .build()
    .unwrap();

  let result = pipeline.run().await;

  assert_eq!(result.outcome(), RunOutcome::Completed);
  assert_eq!(trail_of(&result.context()), vec!["first", "last"]);
}

#[tokio::test]
#[serial]
async fn test_set_skip_condition_and_step_manipulation() {
  setup_tracing();
  let pipeline = Pipeline::builder("manipulated")
    .step(trail_step("a"))
    .step(trail_step("c"))
    .step(trail_step("d"))
    .insert_before("c", trail_step("b"))
    .insert_after("d", trail_step("e"))
    .remove_step("a")
    .set_skip_condition("d", Some(Arc::new(|_ctx: &herald::RunContext| true)))
    .build()
    .unwrap();

  assert_eq!(pipeline.step_names().collect::<Vec<_>>(), vec!["b", "c", "d", "e"]);

  let result = pipeline.run().await;
  assert_eq!(trail_of(&result.context()), vec!["b", "c", "e"]);
}

#[tokio::test]
#[serial]
async fn test_cancelled_run_fails_with_cancelled() {
  setup_tracing();
  let pipeline = Pipeline::builder("cancellable")
    .step(trail_step("only"))
    .build()
    .unwrap();

  let token = CancellationToken::new();
  token.cancel();
  let result = pipeline.run_in(RunEnv::new().with_cancellation(token)).await;

  assert_eq!(result.outcome(), RunOutcome::Failed);
  assert!(result.error().is_some_and(|e| e.is_cancelled()));
  assert!(trail_of(&result.context()).is_empty());
}

#[tokio::test]
#[serial]
async fn test_cancellation_between_steps_abandons_the_rest() {
  setup_tracing();
  let token = CancellationToken::new();
  let token_in_step = token.clone();

  let pipeline = Pipeline::builder("cancel_midway")
    .step(trail_step("first"))
    .on("cancel", move |_args: StepArgs| {
      let token = token_in_step.clone();
      async move {
        token.cancel();
        Ok::<_, anyhow::Error>(PipelineControl::Continue)
      }
    })
    .step(trail_step("never"))
    .build()
    .unwrap();

  let result = pipeline.run_in(RunEnv::new().with_cancellation(token)).await;

  match result.error().map(|e| e.as_ref()) {
    Some(HeraldError::Cancelled { step_name }) => assert_eq!(step_name, "never"),
    other => panic!("Expected HeraldError::Cancelled, got {:?}", other),
  }
  assert_eq!(trail_of(&result.context()), vec!["first"]);
}

#[test]
fn test_build_rejects_empty_pipeline() {
  let err = Pipeline::builder("empty").build().unwrap_err();
  assert!(matches!(err, HeraldError::ConfigurationError { .. }), "got {:?}", err);
}

#[test]
fn test_build_rejects_duplicate_step_names() {
  let err = Pipeline::builder("dupes")
    .step(trail_step("same"))
    .step(trail_step("same"))
    .build()
    .unwrap_err();
  match err {
    HeraldError::ConfigurationError { step_name, .. } => assert_eq!(step_name, "same"),
    other => panic!("Expected ConfigurationError, got {:?}", other),
  }
}

#[test]
fn test_build_rejects_unknown_step_in_manipulation() {
  let err = Pipeline::builder("unknown")
    .step(trail_step("real"))
    .insert_after("ghost", trail_step("new"))
    .build()
    .unwrap_err();
  match err {
    HeraldError::ConfigurationError { step_name, .. } => assert_eq!(step_name, "ghost"),
    other => panic!("Expected ConfigurationError, got {:?}", other),
  }
}

#[test]
fn test_build_rejects_duplicate_parameter_binding() {
  let step = Step::new("doubled", |_args: StepArgs| async move {
    Ok::<_, anyhow::Error>(PipelineControl::Continue)
  })
  .param(herald::Param::<Greeting>::from_context())
  .param(herald::Param::<Greeting>::from_scope());

  let err = Pipeline::builder("dup_params").step(step).build().unwrap_err();
  match err {
    HeraldError::DuplicateParameter { step_name, type_name } => {
      assert_eq!(step_name, "doubled");
      assert!(type_name.ends_with("Greeting"));
    }
    other => panic!("Expected DuplicateParameter, got {:?}", other),
  }
}
