// herald/src/error.rs
use anyhow::Error as AnyhowError;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeraldError {
  /// A declared step parameter was found in none of the permitted sources
  /// and no default was configured.
  #[error("Parameter '{type_name}' of step '{step_name}' could not be resolved (searched: {searched})")]
  ParameterResolution {
    step_name: String,
    type_name: &'static str,
    searched: &'static str,
  },

  /// Any failure raised inside a step body.
  #[error("Step '{step_name}' failed. Source: {source}")]
  Handler {
    step_name: String,
    #[source]
    source: AnyhowError,
  },

  #[error("Retry limit reached after {max_attempts} attempt(s)")]
  RetryExhausted {
    max_attempts: u32,
    #[source]
    last_error: Option<Arc<HeraldError>>,
  },

  #[error("Run cancelled before step '{step_name}'")]
  Cancelled { step_name: String },

  #[error("Duplicate parameter binding for '{type_name}' in step '{step_name}'")]
  DuplicateParameter {
    step_name: String,
    type_name: &'static str,
  },

  #[error("Configuration error for step '{step_name}': {message}")]
  ConfigurationError { step_name: String, message: String },

  #[error("Invalid configuration value for '{key}': {message}")]
  Config { key: String, message: String },

  #[error("Event broker has been shut down")]
  Shutdown,

  #[error("Internal Herald error: {0}")]
  Internal(String),
}

impl HeraldError {
  /// Converts an error returned by a step body into a `HeraldError`.
  ///
  /// Errors that already are `HeraldError` (for example one propagated out of
  /// `Next::run` by a wrapper step) are recovered instead of wrapped again.
  pub(crate) fn from_step(step_name: &str, err: AnyhowError) -> Self {
    match err.downcast::<HeraldError>() {
      Ok(herald_err) => herald_err,
      Err(source) => HeraldError::Handler {
        step_name: step_name.to_string(),
        source,
      },
    }
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, HeraldError::Cancelled { .. })
  }

  pub fn is_retry_exhausted(&self) -> bool {
    matches!(self, HeraldError::RetryExhausted { .. })
  }
}

// Key conversion for external errors.
impl From<AnyhowError> for HeraldError {
  fn from(err: AnyhowError) -> Self {
    // Avoid HeraldError(Handler(HeraldError(...)))
    match err.downcast::<HeraldError>() {
      Ok(herald_err) => herald_err,
      Err(source) => HeraldError::Handler {
        step_name: "<external>".to_string(),
        source,
      },
    }
  }
}

pub type HeraldResult<T, E = HeraldError> = std::result::Result<T, E>;
