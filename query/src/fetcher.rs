use crate::error::{FetchError, MutationError};
use crate::key::QueryKey;
use crate::snapshot::ErasedData;

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

/// The read side of the resource fetcher: produces the data for a key.
///
/// Implemented for any `Fn(QueryKey) -> impl Future<Output = Result<T, FetchError>>`,
/// so closures can be passed directly.
pub trait QueryFn<T>: Send + Sync + 'static {
  fn fetch(&self, key: QueryKey) -> BoxFuture<'static, Result<T, FetchError>>;
}

impl<T, F, Fut> QueryFn<T> for F
where
  F: Fn(QueryKey) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
  fn fetch(&self, key: QueryKey) -> BoxFuture<'static, Result<T, FetchError>> {
    self(key).boxed()
  }
}

/// The write side of the resource fetcher: applies one payload.
pub trait MutationFn<I, R>: Send + Sync + 'static {
  fn mutate(&self, input: I) -> BoxFuture<'static, Result<R, MutationError>>;
}

impl<I, R, F, Fut> MutationFn<I, R> for F
where
  F: Fn(I) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<R, MutationError>> + Send + 'static,
{
  fn mutate(&self, input: I) -> BoxFuture<'static, Result<R, MutationError>> {
    self(input).boxed()
  }
}

/// A fetcher with its data type erased, stored on the cache entry so that
/// invalidation can refetch without knowing the observer's type.
pub(crate) type ErasedFetcher = Arc<dyn Fn(QueryKey) -> BoxFuture<'static, Result<ErasedData, FetchError>> + Send + Sync>;

pub(crate) fn erase<T>(fetcher: Arc<dyn QueryFn<T>>) -> ErasedFetcher
where
  T: Send + Sync + 'static,
{
  Arc::new(move |key| {
    fetcher
      .fetch(key)
      .map(|result| result.map(|data| Arc::new(data) as ErasedData))
      .boxed()
  })
}
