// herald/src/pipeline/mod.rs

//! Defines the `Pipeline` struct, its construction and its execution logic.

pub mod definition;
pub mod execution;
pub mod hooks;
pub mod result;

pub use definition::{Pipeline, PipelineBuilder, PooledContext};
pub use execution::{Next, RunEnv};
pub use result::PipelineResult;
