use crate::client::QueryClient;
use crate::config::QueryConfig;
use crate::error::BuildError;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::shared::ClientShared;

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A builder for creating [`QueryClient`] instances.
pub struct QueryClientBuilder {
  config: QueryConfig,
  spawner: Option<Arc<dyn TaskSpawner>>,
}

impl fmt::Debug for QueryClientBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueryClientBuilder")
      .field("config", &self.config)
      .field("has_spawner", &self.spawner.is_some())
      .finish()
  }
}

impl Default for QueryClientBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl QueryClientBuilder {
  /// Creates a new `QueryClientBuilder` with default settings.
  pub fn new() -> Self {
    Self::from_config(QueryConfig::default())
  }

  /// Starts from a complete configuration, e.g. one loaded from a file.
  pub fn from_config(config: QueryConfig) -> Self {
    Self {
      config,
      spawner: None,
    }
  }

  /// How long fetched data stays fresh.
  pub fn stale_time(mut self, duration: Duration) -> Self {
    self.config.stale_time = duration;
    self
  }

  /// Number of retries after the first failed attempt. `0` disables retrying.
  pub fn retry_limit(mut self, retries: u32) -> Self {
    self.config.retry_limit = retries;
    self
  }

  /// Delay before the first retry. Each further retry doubles it.
  pub fn backoff_base(mut self, duration: Duration) -> Self {
    self.config.backoff_base = duration;
    self
  }

  /// Upper bound on any single retry delay.
  pub fn backoff_cap(mut self, duration: Duration) -> Self {
    self.config.backoff_cap = duration;
    self
  }

  pub fn refetch_on_activate(mut self, enabled: bool) -> Self {
    self.config.refetch_on_activate = enabled;
    self
  }

  /// How long an unobserved entry is kept before it may be dropped.
  pub fn entry_grace_period(mut self, duration: Duration) -> Self {
    self.config.entry_grace_period = duration;
    self
  }

  /// Per-attempt deadline for fetches and mutations.
  pub fn fetch_timeout(mut self, duration: Duration) -> Self {
    self.config.fetch_timeout = Some(duration);
    self
  }

  /// Sets the number of store shards. Rounded up to a power of two.
  pub fn shards(mut self, shards: usize) -> Self {
    self.config.shards = shards;
    self
  }

  /// Runs fetch tasks on a custom executor instead of the current tokio runtime.
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }

  /// Builds the client. Without an explicit spawner this must be called
  /// from within a tokio runtime.
  pub fn build(self) -> Result<QueryClient, BuildError> {
    let mut config = self.config;
    validate(&config)?;
    config.shards = config.shards.next_power_of_two();

    let spawner = match self.spawner {
      Some(spawner) => spawner,
      None => Arc::new(TokioSpawner::try_current().ok_or(BuildError::NoRuntime)?),
    };

    Ok(QueryClient {
      shared: Arc::new(ClientShared::new(config, spawner)),
    })
  }
}

fn validate(config: &QueryConfig) -> Result<(), BuildError> {
  if config.shards == 0 {
    return Err(BuildError::ZeroShards);
  }
  if config.backoff_base > config.backoff_cap {
    return Err(BuildError::BackoffBaseExceedsCap {
      base: config.backoff_base,
      cap: config.backoff_cap,
    });
  }
  Ok(())
}
