// tests/retry_tests.rs
mod common;

use common::*;
use herald::retry::{RetryJob, RetryQueue};
use herald::{Backoff, HeraldError, RetryConfig, RetryMode, RetryPolicy};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

fn job(f: impl FnOnce() + Send + 'static) -> RetryJob {
  Box::new(move || -> Pin<Box<dyn Future<Output = ()> + Send>> {
    f();
    Box::pin(async {})
  })
}

#[test]
fn test_request_retry_allows_exactly_max_minus_one() {
  let policy = RetryPolicy::new(4);

  for expected_retries in 1..=3 {
    policy.request_retry(Duration::from_millis(1)).unwrap();
    assert_eq!(policy.retries(), expected_retries);
  }
  assert!(policy.is_exhausted());

  match policy.request_retry(Duration::from_millis(1)) {
    Err(HeraldError::RetryExhausted { max_attempts, .. }) => assert_eq!(max_attempts, 4),
    other => panic!("Expected RetryExhausted, got {:?}", other),
  }
  assert_eq!(policy.retries(), 3, "a refused request leaves the counter alone");
}

#[test]
fn test_single_attempt_policy_permits_no_retry() {
  let policy = RetryPolicy::new(1);
  assert!(policy.request_retry(Duration::ZERO).unwrap_err().is_retry_exhausted());
  assert_eq!(policy.attempt(), 1);
  assert_eq!(policy.remaining(), 0);
}

#[test]
fn test_clones_share_one_counter() {
  let policy = RetryPolicy::new(3);
  let handle = policy.clone();
  handle.request_retry(Duration::from_millis(5)).unwrap();
  assert_eq!(policy.retries(), 1);
  assert_eq!(policy.attempt(), 2);
}

#[test]
fn test_backoff_delays() {
  assert_eq!(Backoff::Fixed(Duration::from_millis(30)).delay_for(5), Duration::from_millis(30));

  let exponential = Backoff::Exponential {
    initial: Duration::from_millis(100),
    multiplier: 2,
    max: Duration::from_millis(500),
  };
  assert_eq!(exponential.delay_for(0), Duration::from_millis(100));
  assert_eq!(exponential.delay_for(1), Duration::from_millis(200));
  assert_eq!(exponential.delay_for(2), Duration::from_millis(400));
  assert_eq!(exponential.delay_for(3), Duration::from_millis(500));
  assert_eq!(exponential.delay_for(40), Duration::from_millis(500), "overflow clamps to max");
}

#[test]
fn test_retry_config_helpers() {
  let config = RetryConfig::fixed(2, Duration::from_millis(10));
  assert_eq!(config.max_attempts(), 3);
  assert!(config.is_automatic());

  let manual = RetryConfig::exponential(5, Duration::from_millis(1), Duration::from_secs(1)).on_request();
  assert_eq!(manual.mode, RetryMode::OnRequest);
  assert!(!manual.is_automatic());

  assert_eq!(RetryConfig::none().max_attempts(), 1);
}

#[tokio::test]
async fn test_queue_runs_job_only_after_its_delay() {
  setup_tracing();
  let tracker = TaskTracker::new();
  let queue = RetryQueue::start(CancellationToken::new(), tracker.clone());
  let ran = Arc::new(AtomicUsize::new(0));
  let ran_clone = ran.clone();

  queue
    .schedule(Duration::from_millis(80), job(move || {
      ran_clone.fetch_add(1, Ordering::SeqCst);
    }))
    .unwrap();
  assert_eq!(queue.len(), 1);

  tokio::time::sleep(Duration::from_millis(20)).await;
  assert_eq!(ran.load(Ordering::SeqCst), 0, "job must not run before it is due");

  assert!(wait_until(Duration::from_secs(2), || ran.load(Ordering::SeqCst) == 1).await);
  assert!(queue.is_empty());
  queue.cancel();
}

#[tokio::test]
async fn test_queue_orders_by_due_time_then_insertion() {
  setup_tracing();
  let queue = RetryQueue::start(CancellationToken::new(), TaskTracker::new());
  let order = Arc::new(Mutex::new(Vec::new()));

  for (label, delay_ms) in [("late", 60u64), ("early", 10), ("tie_a", 30), ("tie_b", 30)] {
    let order = order.clone();
    queue
      .schedule(Duration::from_millis(delay_ms), job(move || order.lock().unwrap().push(label)))
      .unwrap();
  }

  assert!(wait_until(Duration::from_secs(2), || order.lock().unwrap().len() == 4).await);
  assert_eq!(*order.lock().unwrap(), vec!["early", "tie_a", "tie_b", "late"]);
  queue.cancel();
}

#[tokio::test]
async fn test_cancelled_queue_discards_pending_jobs() {
  setup_tracing();
  let queue = RetryQueue::start(CancellationToken::new(), TaskTracker::new());
  let ran = Arc::new(AtomicUsize::new(0));

  for _ in 0..3 {
    let ran = ran.clone();
    queue
      .schedule(Duration::from_millis(30), job(move || {
        ran.fetch_add(1, Ordering::SeqCst);
      }))
      .unwrap();
  }
  queue.cancel();
  assert!(queue.is_empty());
  assert!(queue.is_cancelled());

  tokio::time::sleep(Duration::from_millis(80)).await;
  assert_eq!(ran.load(Ordering::SeqCst), 0);

  let refused = queue.schedule(Duration::ZERO, job(|| {}));
  assert!(matches!(refused, Err(HeraldError::Shutdown)));
}

#[tokio::test]
async fn test_huge_delay_is_queued_not_overflowed() {
  setup_tracing();
  let queue = RetryQueue::start(CancellationToken::new(), TaskTracker::new());
  queue.schedule(Duration::MAX, job(|| {})).unwrap();
  assert_eq!(queue.len(), 1);
  queue.cancel();
  assert!(queue.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_nothing_survives_cancel_racing_with_schedule() {
  setup_tracing();
  for _ in 0..50 {
    let queue = RetryQueue::start(CancellationToken::new(), TaskTracker::new());
    let schedulers: Vec<_> = (0..4)
      .map(|_| {
        let queue = queue.clone();
        std::thread::spawn(move || {
          for _ in 0..100 {
            if queue.schedule(Duration::from_secs(60), job(|| {})).is_err() {
              break;
            }
          }
        })
      })
      .collect();

    std::thread::yield_now();
    queue.cancel();
    for scheduler in schedulers {
      scheduler.join().unwrap();
    }
    assert!(queue.is_empty(), "an entry was accepted after the queue was cancelled");
  }
}
