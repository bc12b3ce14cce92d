// herald/src/config.rs

//! Broker configuration, built in code or read from `HERALD_*` environment keys.

use crate::error::{HeraldError, HeraldResult};
use crate::retry::RetryConfig;
use std::str::FromStr;
use std::time::Duration;
use tracing::{event, Level};

pub const ENV_DISPATCH_MODE: &str = "HERALD_DISPATCH_MODE";
pub const ENV_MAX_RETRIES: &str = "HERALD_MAX_RETRIES";
pub const ENV_RETRY_DELAY_MS: &str = "HERALD_RETRY_DELAY_MS";
pub const ENV_MAX_CONCURRENCY: &str = "HERALD_MAX_CONCURRENCY";
pub const ENV_POOL_CAPACITY: &str = "HERALD_POOL_CAPACITY";

const DEFAULT_POOL_CAPACITY: usize = 256;

/// When `publish` returns to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
  /// As soon as every invocation has been spawned.
  #[default]
  FireAndForget,
  /// Once every invocation's first attempt has finished. Retries still run
  /// in the background.
  WaitForCompletion,
}

impl FromStr for DispatchMode {
  type Err = HeraldError;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    match value.trim().to_ascii_lowercase().as_str() {
      "fire" | "fire_and_forget" | "fire-and-forget" => Ok(DispatchMode::FireAndForget),
      "wait" | "wait_for_completion" | "wait-for-completion" => Ok(DispatchMode::WaitForCompletion),
      other => Err(HeraldError::Config {
        key: ENV_DISPATCH_MODE.to_string(),
        message: format!("unknown dispatch mode '{}', expected 'fire' or 'wait'", other),
      }),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
  pub dispatch_mode: DispatchMode,
  /// Used by registrations that carry no retry settings of their own.
  pub default_retry: RetryConfig,
  /// `None` means unbounded.
  pub max_concurrent_invocations: Option<usize>,
  pub context_pool_capacity: usize,
  pub invocation_pool_capacity: usize,
  pub retry_policy_pool_capacity: usize,
}

impl Default for BrokerConfig {
  fn default() -> Self {
    Self {
      dispatch_mode: DispatchMode::default(),
      default_retry: RetryConfig::default(),
      max_concurrent_invocations: None,
      context_pool_capacity: DEFAULT_POOL_CAPACITY,
      invocation_pool_capacity: DEFAULT_POOL_CAPACITY,
      retry_policy_pool_capacity: DEFAULT_POOL_CAPACITY,
    }
  }
}

impl BrokerConfig {
  pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
    self.dispatch_mode = mode;
    self
  }

  pub fn with_default_retry(mut self, retry: RetryConfig) -> Self {
    self.default_retry = retry;
    self
  }

  pub fn with_max_concurrent_invocations(mut self, limit: usize) -> Self {
    self.max_concurrent_invocations = Some(limit);
    self
  }

  /// Sets the capacity of all three pools.
  pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
    self.context_pool_capacity = capacity;
    self.invocation_pool_capacity = capacity;
    self.retry_policy_pool_capacity = capacity;
    self
  }

  /// Reads the configuration from the process environment.
  pub fn from_env() -> HeraldResult<Self> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Reads the configuration through `lookup`, starting from the defaults.
  ///
  /// Absent keys keep their default; present but malformed keys are an error.
  /// `HERALD_RETRY_DELAY_MS` switches the default backoff to a fixed delay.
  pub fn from_lookup<F>(lookup: F) -> HeraldResult<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let mut config = Self::default();

    if let Some(raw) = lookup(ENV_DISPATCH_MODE) {
      config.dispatch_mode = raw.parse()?;
    }
    if let Some(max_retries) = parse_key::<u32>(&lookup, ENV_MAX_RETRIES)? {
      config.default_retry.max_retries = max_retries;
    }
    if let Some(delay_ms) = parse_key::<u64>(&lookup, ENV_RETRY_DELAY_MS)? {
      config.default_retry.backoff = crate::retry::Backoff::Fixed(Duration::from_millis(delay_ms));
    }
    if let Some(limit) = parse_key::<usize>(&lookup, ENV_MAX_CONCURRENCY)? {
      if limit == 0 {
        return Err(HeraldError::Config {
          key: ENV_MAX_CONCURRENCY.to_string(),
          message: "must be greater than zero".to_string(),
        });
      }
      config.max_concurrent_invocations = Some(limit);
    }
    if let Some(capacity) = parse_key::<usize>(&lookup, ENV_POOL_CAPACITY)? {
      config = config.with_pool_capacity(capacity);
    }

    event!(Level::INFO, ?config, "Broker configuration loaded.");
    Ok(config)
  }
}

fn parse_key<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> HeraldResult<Option<T>>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  match lookup(key) {
    None => Ok(None),
    Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| HeraldError::Config {
      key: key.to_string(),
      message: format!("'{}' is not valid: {}", raw, e),
    }),
  }
}
