use crate::fetcher::ErasedFetcher;
use crate::key::QueryKey;
use crate::observer::{Observer, QueryOptions};
use crate::shared::ClientShared;
use crate::snapshot::QuerySnapshot;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::select_all;
use tracing::trace;

/// A dynamic group of observers, one per requested key, sharing one fetcher.
///
/// Positions in [`QueryBatch::snapshots`] always follow the order of the last
/// key list given to [`QueryBatch::set_keys`], whatever order the fetches
/// complete in. A failure at one key never affects the status of another.
pub struct QueryBatch<T> {
  shared: Arc<ClientShared>,
  fetcher: ErasedFetcher,
  options: QueryOptions,
  keys: Vec<QueryKey>,
  observers: HashMap<QueryKey, Observer<T>, ahash::RandomState>,
}

impl<T> fmt::Debug for QueryBatch<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueryBatch")
      .field("keys", &self.keys)
      .field("observers", &self.observers.len())
      .finish_non_exhaustive()
  }
}

impl<T> QueryBatch<T>
where
  T: Send + Sync + 'static,
{
  pub(crate) fn new(shared: Arc<ClientShared>, fetcher: ErasedFetcher, options: QueryOptions) -> Self {
    Self {
      shared,
      fetcher,
      options,
      keys: Vec::new(),
      observers: HashMap::default(),
    }
  }

  /// Replaces the key list. New keys are subscribed, keys no longer present
  /// are unsubscribed, and observers for kept keys are reused as they are.
  pub fn set_keys<I>(&mut self, keys: I)
  where
    I: IntoIterator,
    I::Item: Into<QueryKey>,
  {
    let keys: Vec<QueryKey> = keys.into_iter().map(Into::into).collect();
    let wanted: ahash::HashSet<&QueryKey> = keys.iter().collect();

    let before = self.observers.len();
    self.observers.retain(|key, _| wanted.contains(key));
    let dropped = before - self.observers.len();

    let mut added = 0;
    for key in &keys {
      if !self.observers.contains_key(key) {
        let observer = Observer::subscribe(
          &self.shared,
          key.clone(),
          Arc::clone(&self.fetcher),
          self.options,
        );
        self.observers.insert(key.clone(), observer);
        added += 1;
      }
    }

    trace!(len = keys.len(), added, dropped, "batch keys updated");
    self.keys = keys;
  }

  /// The keys in input order.
  pub fn keys(&self) -> &[QueryKey] {
    &self.keys
  }

  pub fn len(&self) -> usize {
    self.keys.len()
  }

  pub fn is_empty(&self) -> bool {
    self.keys.is_empty()
  }

  /// The observer serving `key`, if it is part of the batch.
  pub fn observer(&self, key: &QueryKey) -> Option<&Observer<T>> {
    self.observers.get(key)
  }

  /// One snapshot per input key, in input order.
  pub fn snapshots(&self) -> Vec<QuerySnapshot<T>> {
    self
      .keys
      .iter()
      .map(|key| {
        self
          .observers
          .get(key)
          .map_or_else(QuerySnapshot::idle, Observer::snapshot)
      })
      .collect()
  }

  /// `true` while any member has a fetch in flight.
  pub fn is_fetching(&self) -> bool {
    self.observers.values().any(|observer| observer.snapshot().is_fetching())
  }

  /// Waits until any member's entry changes. Returns immediately for an empty batch.
  pub async fn changed(&mut self) {
    if self.observers.is_empty() {
      return;
    }
    let changes = self
      .observers
      .values_mut()
      .map(|observer| Box::pin(observer.changed()));
    select_all(changes).await;
  }

  /// Waits until `predicate` holds for the ordered snapshots and returns them.
  pub async fn wait_for(&mut self, mut predicate: impl FnMut(&[QuerySnapshot<T>]) -> bool) -> Vec<QuerySnapshot<T>> {
    loop {
      let snapshots = self.snapshots();
      if predicate(&snapshots) || self.observers.is_empty() {
        return snapshots;
      }
      self.changed().await;
    }
  }

  /// Waits until every member has settled.
  pub async fn settled(&mut self) -> Vec<QuerySnapshot<T>> {
    self
      .wait_for(|snapshots| snapshots.iter().all(QuerySnapshot::is_settled))
      .await
  }
}
