// src/lib.rs

//! Herald: an ASYNC, in-process, type-keyed event broker for Rust.
//!
//! Herald dispatches published events to pipelines registered for the
//! event's exact type, with features like:
//!  - Pipelines of named steps, including wrapper (middleware) steps.
//!  - Per-step parameter declarations resolved from the run context or a host service scope.
//!  - Early stopping of pipeline execution.
//!  - Concurrent, independent invocations per registration.
//!  - Retries with fixed or exponential backoff, driven by the broker or the handler.
//!  - Pooled run contexts, invocations and retry policies.
//!  - Dynamic registration and removal through claim tickets.

pub mod broker;
pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod retry;
pub mod services;

// --- Re-exports for the Public API ---

// Core types that step bodies interact with frequently
pub use crate::core::context_data::ContextData;
pub use crate::core::control::{PipelineControl, RunOutcome};
pub use crate::core::param::{NotFound, Param, ParamSource};
pub use crate::core::run_context::RunContext;
pub use crate::core::step::{Step, StepArgs};

// Pipelines and their execution
pub use crate::pipeline::{Next, Pipeline, PipelineBuilder, PipelineResult, RunEnv};

// The broker
pub use crate::broker::{Event, EventBroker, EventBrokerBuilder, EventHandler, InvocationOutcome, Registration};
pub use crate::config::{BrokerConfig, DispatchMode};
pub use crate::registry::{ClaimTicket, HandlerRegistry};
pub use crate::retry::{Backoff, RetryConfig, RetryMode, RetryPolicy};

pub use crate::pool::{Pool, PoolStats, Pooled, Recycle};
pub use crate::services::{ScopeFactory, ServiceCollection, ServiceScope};

pub use crate::error::{HeraldError, HeraldResult};

// Handlers receive this token; re-exported so callers need no direct tokio-util dependency.
pub use tokio_util::sync::CancellationToken;

/*
    Core Workflow:
    1. Define an event type `MyEvent` (any `Send + Sync + 'static` value).
    2. Implement `EventHandler<MyEvent>` for your handler, or assemble a `Pipeline`
       whose steps declare `Param::<MyEvent>::from_context()`.
    3. Create an `EventBroker` inside a tokio runtime.
    4. `broker.subscribe(handler)` or `broker.register(Registration::pipeline(p))`;
       keep the returned `ClaimTicket` to unregister later.
    5. `broker.publish(MyEvent { .. }).await`. Failures are retried per the
       registration's `RetryConfig` and finally reported to `on_error`.
*/
