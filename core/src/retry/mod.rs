// herald/src/retry/mod.rs

//! Per-invocation retry state and the timer-driven queue that replays failed
//! invocations after their backoff.

pub mod policy;
pub mod queue;

pub use policy::{Backoff, RetryConfig, RetryMode, RetryPolicy};
pub use queue::{RetryJob, RetryQueue};
