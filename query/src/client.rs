use crate::batch::QueryBatch;
use crate::builder::QueryClientBuilder;
use crate::config::QueryConfig;
use crate::entry::QueryEntry;
use crate::fetch;
use crate::fetcher::{self, MutationFn, QueryFn};
use crate::invalidation;
use crate::key::QueryKey;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::mutation::MutationBuilder;
use crate::observer::{Observer, QueryOptions};
use crate::shared::ClientShared;
use crate::snapshot::{FetchStatus, QuerySnapshot};
use crate::time;

use std::sync::Arc;

use tracing::debug;

/// The entry point of the engine: owns the cache store and hands out
/// observers, batches and mutations. Cloning is cheap and shares all state.
#[derive(Debug, Clone)]
pub struct QueryClient {
  pub(crate) shared: Arc<ClientShared>,
}

impl QueryClient {
  pub fn builder() -> QueryClientBuilder {
    QueryClientBuilder::new()
  }

  /// Builds a client from a complete configuration.
  pub fn new(config: QueryConfig) -> Result<Self, crate::BuildError> {
    QueryClientBuilder::from_config(config).build()
  }

  pub fn config(&self) -> &QueryConfig {
    &self.shared.config
  }

  /// Subscribes to `key`, fetching it with `fetcher` when it is missing or stale.
  ///
  /// The returned observer already holds the current snapshot, which may be
  /// stale or still pending.
  pub fn subscribe<T, F>(&self, key: impl Into<QueryKey>, fetcher: F) -> Observer<T>
  where
    T: Send + Sync + 'static,
    F: QueryFn<T>,
  {
    self.subscribe_with(key, fetcher, QueryOptions::default())
  }

  pub fn subscribe_with<T, F>(&self, key: impl Into<QueryKey>, fetcher: F, options: QueryOptions) -> Observer<T>
  where
    T: Send + Sync + 'static,
    F: QueryFn<T>,
  {
    let fetcher = fetcher::erase(Arc::new(fetcher) as Arc<dyn QueryFn<T>>);
    Observer::subscribe(&self.shared, key.into(), fetcher, options)
  }

  /// Creates an empty batch whose members are all fetched with `fetcher`.
  pub fn batch<T, F>(&self, fetcher: F) -> QueryBatch<T>
  where
    T: Send + Sync + 'static,
    F: QueryFn<T>,
  {
    self.batch_with(fetcher, QueryOptions::default())
  }

  pub fn batch_with<T, F>(&self, fetcher: F, options: QueryOptions) -> QueryBatch<T>
  where
    T: Send + Sync + 'static,
    F: QueryFn<T>,
  {
    let fetcher = fetcher::erase(Arc::new(fetcher) as Arc<dyn QueryFn<T>>);
    QueryBatch::new(Arc::clone(&self.shared), fetcher, options)
  }

  /// Subscribes to every key in order, returning the batch that holds them.
  pub fn subscribe_all<T, F, I>(&self, keys: I, fetcher: F) -> QueryBatch<T>
  where
    T: Send + Sync + 'static,
    F: QueryFn<T>,
    I: IntoIterator,
    I::Item: Into<QueryKey>,
  {
    let mut batch = self.batch(fetcher);
    batch.set_keys(keys);
    batch
  }

  /// Starts building a mutation around `mutate`.
  pub fn mutation<I, R, F>(&self, mutate: F) -> MutationBuilder<I, R>
  where
    I: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
    F: MutationFn<I, R>,
  {
    MutationBuilder::new(Arc::clone(&self.shared), Arc::new(mutate))
  }

  /// Marks `key` and every entry below it stale, refetching those with
  /// active observers. Returns the number of entries marked.
  pub fn invalidate(&self, key: &QueryKey) -> usize {
    invalidation::invalidate(&self.shared, std::slice::from_ref(key))
  }

  /// Invalidates several keys at once. Overlapping targets mark each entry once.
  pub fn invalidate_many(&self, keys: &[QueryKey]) -> usize {
    invalidation::invalidate(&self.shared, keys)
  }

  /// Removes unobserved entries at or below `key`. Observed entries are
  /// invalidated instead. Returns the number of entries removed.
  pub fn remove_queries(&self, key: &QueryKey) -> usize {
    invalidation::remove(&self.shared, std::slice::from_ref(key))
  }

  /// Reads cached data without subscribing or triggering a fetch.
  pub fn get_query_data<T>(&self, key: &QueryKey) -> Option<Arc<T>>
  where
    T: Send + Sync + 'static,
  {
    let entry = self.live_entry(key)?;
    let data = entry.lock().data.clone()?;
    data.downcast::<T>().ok()
  }

  /// Reads the full snapshot of an entry without subscribing.
  pub fn get_query_snapshot<T>(&self, key: &QueryKey) -> Option<QuerySnapshot<T>>
  where
    T: Send + Sync + 'static,
  {
    let entry = self.live_entry(key)?;
    let snapshot = entry.lock().snapshot();
    Some(snapshot.typed(key))
  }

  /// Number of entries with a fetch in flight, optionally under `prefix`.
  pub fn fetching_count(&self, prefix: Option<&QueryKey>) -> usize {
    self
      .shared
      .store
      .entries()
      .iter()
      .filter(|entry| prefix.map_or(true, |prefix| prefix.is_prefix_of(entry.key())))
      .filter(|entry| entry.lock().fetch_status == FetchStatus::Fetching)
      .count()
  }

  /// Number of entries currently held, including ones in their grace period.
  pub fn entry_count(&self) -> usize {
    let evicted = self
      .shared
      .store
      .sweep(time::now(), self.shared.config.entry_grace_period);
    Metrics::add(&self.shared.metrics.entries_evicted, evicted);
    self.shared.store.len()
  }

  /// Looks up an entry, dropping it instead if its grace period has run out.
  fn live_entry(&self, key: &QueryKey) -> Option<Arc<QueryEntry>> {
    let now = time::now();
    let grace = self.shared.config.entry_grace_period;
    let entry = self.shared.store.get(key)?;
    if !entry.lock().is_evictable(now, grace) {
      return Some(entry);
    }

    let removed = self
      .shared
      .store
      .remove_if(key, |candidate| candidate.lock().is_evictable(now, grace));
    match removed {
      Some(_) => {
        Metrics::incr(&self.shared.metrics.entries_evicted);
        debug!(key = %key, "evicting entry after grace period");
        None
      }
      // Re-attached in the meantime.
      None => self.shared.store.get(key),
    }
  }

  pub fn is_online(&self) -> bool {
    self.shared.is_online()
  }

  /// Gates network activity. While offline, fetches that would start are
  /// held as `Paused`; going back online resumes every paused fetch, including
  /// those whose observers have since left.
  pub fn set_online(&self, online: bool) {
    let was_online = self.shared.set_online(online);
    if !online || was_online {
      return;
    }

    let mut resumed = 0;
    for entry in self.shared.store.entries() {
      let pending = {
        let mut state = entry.lock();
        if state.fetch_status != FetchStatus::Paused {
          continue;
        }
        fetch::begin_locked(&self.shared, &entry, &mut state)
      };
      if fetch::spawn(&self.shared, pending) {
        resumed += 1;
      }
    }
    debug!(resumed, "client back online");
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// Stops accepting new fetches and mutations, cuts retry backoff short,
  /// and waits until every inflight fetch task has finished.
  pub async fn shutdown(&self) {
    if self.shared.close() {
      debug!(inflight = self.shared.inflight.count(), "query client shutting down");
    }
    self.shared.inflight.drained().await;
  }

  pub fn is_shut_down(&self) -> bool {
    self.shared.is_closed()
  }
}
