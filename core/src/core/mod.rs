pub mod context_data;
pub mod control;
pub mod param;
pub mod run_context;
pub mod step;

// Re-export key types for easier access from other Herald modules (and lib.rs)
pub use context_data::ContextData;
pub use control::{PipelineControl, RunOutcome};
pub use param::{NotFound, Param, ParamSource, ParamSpec};
pub use run_context::{ContextValue, RunContext};
pub use step::{SkipCondition, Step, StepArgs, StepFuture};
