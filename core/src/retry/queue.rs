// herald/src/retry/queue.rs

//! The shared, due-time ordered queue of pending retries and its scheduling loop.

use crate::error::{HeraldError, HeraldResult};
use parking_lot::Mutex;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{event, Level};

// Due time used when `now + delay` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A replayable invocation, captured with everything it needs to run again.
pub type RetryJob = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

struct Entry {
  due: Instant,
  seq: u64,
  job: RetryJob,
}

impl PartialEq for Entry {
  fn eq(&self, other: &Self) -> bool {
    self.due == other.due && self.seq == other.seq
  }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
  fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
    Some(self.cmp(other))
  }
}

impl Ord for Entry {
  fn cmp(&self, other: &Self) -> CmpOrdering {
    self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
  }
}

struct QueueShared {
  entries: Mutex<BinaryHeap<Reverse<Entry>>>,
  wake: Notify,
  next_seq: AtomicU64,
  token: CancellationToken,
}

impl QueueShared {
  fn pop_due(&self, now: Instant) -> Vec<RetryJob> {
    let mut entries = self.entries.lock();
    let mut due = Vec::new();
    while entries.peek().is_some_and(|Reverse(entry)| entry.due <= now) {
      if let Some(Reverse(entry)) = entries.pop() {
        due.push(entry.job);
      }
    }
    due
  }

  fn next_due(&self) -> Option<Instant> {
    self.entries.lock().peek().map(|Reverse(entry)| entry.due)
  }

  fn discard_all(&self) -> usize {
    let mut entries = self.entries.lock();
    let discarded = entries.len();
    entries.clear();
    discarded
  }
}

/// Re-schedules failed invocations after their backoff delay.
///
/// One background loop sleeps until the earliest due time, then hands every
/// due job to the task tracker; a slow retry never delays other due retries.
/// Cancelling the queue discards pending jobs without running them.
#[derive(Clone)]
pub struct RetryQueue {
  shared: Arc<QueueShared>,
}

impl RetryQueue {
  /// Starts the scheduling loop. Must be called inside a tokio runtime.
  pub fn start(token: CancellationToken, tracker: TaskTracker) -> Self {
    let shared = Arc::new(QueueShared {
      entries: Mutex::new(BinaryHeap::new()),
      wake: Notify::new(),
      next_seq: AtomicU64::new(0),
      token,
    });
    tokio::spawn(Self::run_loop(Arc::clone(&shared), tracker));
    Self { shared }
  }

  /// Adds `job` to run `delay` from now.
  pub fn schedule(&self, delay: Duration, job: RetryJob) -> HeraldResult<()> {
    let now = Instant::now();
    let due = now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE);
    {
      // Checked under the lock: `cancel` discards while holding it.
      let mut entries = self.shared.entries.lock();
      if self.shared.token.is_cancelled() {
        return Err(HeraldError::Shutdown);
      }
      let entry = Entry {
        due,
        seq: self.shared.next_seq.fetch_add(1, Ordering::Relaxed),
        job,
      };
      entries.push(Reverse(entry));
    }
    self.shared.wake.notify_one();
    event!(Level::DEBUG, delay_ms = delay.as_millis() as u64, "Retry scheduled.");
    Ok(())
  }

  /// Number of retries waiting for their due time.
  pub fn len(&self) -> usize {
    self.shared.entries.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Stops the loop and discards every pending entry.
  pub fn cancel(&self) {
    self.shared.token.cancel();
    let discarded = self.shared.discard_all();
    event!(Level::INFO, discarded, "Retry queue cancelled.");
  }

  pub fn is_cancelled(&self) -> bool {
    self.shared.token.is_cancelled()
  }

  async fn run_loop(shared: Arc<QueueShared>, tracker: TaskTracker) {
    event!(Level::DEBUG, "Retry queue loop started.");
    loop {
      for job in shared.pop_due(Instant::now()) {
        tracker.spawn(job());
      }

      match shared.next_due() {
        Some(due) => {
          tokio::select! {
            _ = shared.token.cancelled() => break,
            _ = sleep_until(due) => {}
            _ = shared.wake.notified() => {}
          }
        }
        None => {
          tokio::select! {
            _ = shared.token.cancelled() => break,
            _ = shared.wake.notified() => {}
          }
        }
      }
    }
    let discarded = shared.discard_all();
    event!(Level::DEBUG, discarded, "Retry queue loop stopped.");
  }
}

impl fmt::Debug for RetryQueue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RetryQueue")
      .field("pending", &self.len())
      .field("cancelled", &self.is_cancelled())
      .finish()
  }
}
