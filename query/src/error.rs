use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

/// A shared, type-erased error source. Cloned into every observer snapshot.
pub type SharedError = Arc<dyn StdError + Send + Sync>;

/// Errors that can occur when building a query client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
  /// The store was configured with zero shards.
  #[error("shard count cannot be zero")]
  ZeroShards,
  /// The first retry delay is larger than the cap that bounds every delay.
  #[error("backoff base ({base:?}) cannot exceed backoff cap ({cap:?})")]
  BackoffBaseExceedsCap { base: Duration, cap: Duration },
  /// No spawner was configured and there is no current tokio runtime.
  #[error("a task spawner or a current tokio runtime is required")]
  NoRuntime,
}

/// A failure of a single fetch attempt. Both variants are retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
  /// A network or storage failure reported by the fetcher.
  #[error("transient fetch failure: {0}")]
  Transient(SharedError),
  /// The attempt did not finish within the configured fetch timeout.
  #[error("fetch timed out after {0:?}")]
  Timeout(Duration),
}

impl FetchError {
  /// Wraps any error (or message) as a transient failure.
  pub fn transient(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
    FetchError::Transient(Arc::from(err.into()))
  }

  pub fn is_timeout(&self) -> bool {
    matches!(self, FetchError::Timeout(_))
  }
}

/// A terminal error stored in a cache entry and delivered to all of its observers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
  /// Every attempt of the fetch cycle failed.
  #[error("query failed after {attempts} attempts: {last}")]
  RetriesExhausted { attempts: u32, last: FetchError },
  /// The client was shut down before the query could be fetched.
  #[error("query client is shut down")]
  Shutdown,
  /// The cached data does not have the type the observer asked for.
  #[error("cached data for {key} is not a `{expected}`")]
  TypeMismatch { key: String, expected: &'static str },
}

impl QueryError {
  /// Returns the last attempt's failure, if the error came from the fetcher.
  pub fn fetch_error(&self) -> Option<&FetchError> {
    match self {
      QueryError::RetriesExhausted { last, .. } => Some(last),
      _ => None,
    }
  }
}

/// A failed write. Returned to the single caller of `Mutation::run`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MutationError {
  #[error("mutation rejected: {0}")]
  Rejected(SharedError),
  #[error("mutation timed out after {0:?}")]
  Timeout(Duration),
  #[error("query client is shut down")]
  Shutdown,
  /// The caller dropped the run before the write finished.
  #[error("mutation cancelled before it settled")]
  Cancelled,
}

impl MutationError {
  /// Wraps any error (or message) as a rejected mutation.
  pub fn rejected(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
    MutationError::Rejected(Arc::from(err.into()))
  }
}

impl From<FetchError> for MutationError {
  fn from(err: FetchError) -> Self {
    match err {
      FetchError::Transient(source) => MutationError::Rejected(source),
      FetchError::Timeout(after) => MutationError::Timeout(after),
    }
  }
}
