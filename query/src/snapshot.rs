use crate::error::QueryError;
use crate::key::QueryKey;
use crate::time::Instant;

use std::any::Any;
use std::sync::Arc;

/// Lifecycle of the logical query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
  /// No fetch has been issued yet.
  Idle,
  /// A fetch cycle is running. Previously held data is still visible.
  Pending,
  /// The last fetch cycle succeeded.
  Success,
  /// The last fetch cycle exhausted its retries.
  Error,
}

/// Lifecycle of the current network activity, orthogonal to [`QueryStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStatus {
  Idle,
  Fetching,
  /// A fetch is wanted but the client is offline.
  Paused,
}

pub(crate) type ErasedData = Arc<dyn Any + Send + Sync>;

/// The untyped view of an entry that is broadcast to observers.
#[derive(Clone)]
pub(crate) struct RawSnapshot {
  pub(crate) data: Option<ErasedData>,
  pub(crate) error: Option<QueryError>,
  pub(crate) status: QueryStatus,
  pub(crate) fetch_status: FetchStatus,
  pub(crate) updated_at: Option<Instant>,
  pub(crate) retry_count: u32,
  pub(crate) is_invalidated: bool,
}

impl RawSnapshot {
  pub(crate) fn idle() -> Self {
    Self {
      data: None,
      error: None,
      status: QueryStatus::Idle,
      fetch_status: FetchStatus::Idle,
      updated_at: None,
      retry_count: 0,
      is_invalidated: false,
    }
  }

  /// Narrows the snapshot to the observer's data type.
  pub(crate) fn typed<T: Send + Sync + 'static>(&self, key: &QueryKey) -> QuerySnapshot<T> {
    let mut snapshot = QuerySnapshot {
      data: None,
      error: self.error.clone(),
      status: self.status,
      fetch_status: self.fetch_status,
      updated_at: self.updated_at,
      retry_count: self.retry_count,
      is_invalidated: self.is_invalidated,
    };

    if let Some(data) = &self.data {
      match Arc::clone(data).downcast::<T>() {
        Ok(data) => snapshot.data = Some(data),
        Err(_) => {
          snapshot.status = QueryStatus::Error;
          snapshot.error = Some(QueryError::TypeMismatch {
            key: key.to_string(),
            expected: std::any::type_name::<T>(),
          });
        }
      }
    }
    snapshot
  }
}

/// A read-only, internally consistent view of one cache entry.
#[derive(Debug, Clone)]
pub struct QuerySnapshot<T> {
  pub data: Option<Arc<T>>,
  pub error: Option<QueryError>,
  pub status: QueryStatus,
  pub fetch_status: FetchStatus,
  /// When `data` was last written by a successful fetch.
  pub updated_at: Option<Instant>,
  /// Failed attempts in the current (or last) fetch cycle.
  pub retry_count: u32,
  /// Whether the entry has been explicitly invalidated since its last success.
  pub is_invalidated: bool,
}

impl<T> QuerySnapshot<T> {
  pub(crate) fn idle() -> Self {
    Self {
      data: None,
      error: None,
      status: QueryStatus::Idle,
      fetch_status: FetchStatus::Idle,
      updated_at: None,
      retry_count: 0,
      is_invalidated: false,
    }
  }

  #[inline]
  pub fn is_pending(&self) -> bool {
    self.status == QueryStatus::Pending
  }

  #[inline]
  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  #[inline]
  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  #[inline]
  pub fn is_fetching(&self) -> bool {
    self.fetch_status == FetchStatus::Fetching
  }

  /// `true` once the query has reached a terminal status and nothing is in flight.
  pub fn is_settled(&self) -> bool {
    matches!(self.status, QueryStatus::Success | QueryStatus::Error)
      && self.fetch_status == FetchStatus::Idle
  }
}
