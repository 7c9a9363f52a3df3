use crate::entry::QueryEntry;
use crate::fetch;
use crate::fetcher::ErasedFetcher;
use crate::key::QueryKey;
use crate::metrics::Metrics;
use crate::shared::ClientShared;
use crate::snapshot::{QuerySnapshot, RawSnapshot};
use crate::time;

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::trace;

/// Per-subscription overrides of the client configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
  pub(crate) stale_time: Option<Duration>,
}

impl QueryOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Overrides the stale time of the entry. The most recent subscription wins.
  pub fn stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = Some(stale_time);
    self
  }
}

/// Identifies one live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub(crate) u64);

/// A live subscription to one cache entry.
///
/// The current snapshot is available synchronously through [`Observer::snapshot`];
/// later changes are awaited with [`Observer::changed`]. Dropping the observer
/// unsubscribes it. Unsubscribing never cancels an inflight fetch.
pub struct Observer<T> {
  id: ObserverId,
  entry: Arc<QueryEntry>,
  shared: Arc<ClientShared>,
  receiver: watch::Receiver<RawSnapshot>,
  attached: bool,
  _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Observer<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Observer")
      .field("id", &self.id)
      .field("key", self.entry.key())
      .field("attached", &self.attached)
      .finish()
  }
}

impl<T> Observer<T>
where
  T: Send + Sync + 'static,
{
  pub(crate) fn subscribe(
    shared: &Arc<ClientShared>,
    key: QueryKey,
    fetcher: ErasedFetcher,
    options: QueryOptions,
  ) -> Self {
    let now = time::now();
    let attached = shared.store.attach(
      &key,
      options.stale_time.unwrap_or(shared.config.stale_time),
      now,
      shared.config.entry_grace_period,
    );
    if attached.created {
      Metrics::incr(&shared.metrics.entries_created);
    }
    Metrics::add(&shared.metrics.entries_evicted, attached.evicted);

    let entry = attached.entry;
    let receiver = entry.watch();
    let should_check = {
      let mut state = entry.lock();
      state.fetcher = Some(fetcher);
      if let Some(stale_time) = options.stale_time {
        state.stale_time = stale_time;
      }
      shared.config.refetch_on_activate || state.data.is_none() || state.invalidated
    };
    if should_check {
      fetch::ensure_fresh(shared, &entry);
    }

    let id = ObserverId(shared.next_id());
    trace!(key = %key, observer = id.0, "observer subscribed");

    let mut observer = Self {
      id,
      entry,
      shared: Arc::clone(shared),
      receiver,
      attached: true,
      _marker: PhantomData,
    };
    // The snapshot as of now counts as delivered.
    observer.receiver.borrow_and_update();
    observer
  }

  #[inline]
  pub fn id(&self) -> ObserverId {
    self.id
  }

  #[inline]
  pub fn key(&self) -> &QueryKey {
    self.entry.key()
  }

  /// The entry's current state.
  pub fn snapshot(&self) -> QuerySnapshot<T> {
    self.receiver.borrow().typed(self.entry.key())
  }

  /// Waits for the next change to the entry and returns the new snapshot.
  pub async fn changed(&mut self) -> QuerySnapshot<T> {
    // The entry owns the sender and we own the entry, so this cannot close.
    let _ = self.receiver.changed().await;
    self.receiver.borrow_and_update().typed(self.entry.key())
  }

  /// Waits until `predicate` holds for the current snapshot and returns it.
  pub async fn wait_for(&mut self, mut predicate: impl FnMut(&QuerySnapshot<T>) -> bool) -> QuerySnapshot<T> {
    loop {
      let snapshot = self.receiver.borrow_and_update().typed(self.entry.key());
      if predicate(&snapshot) {
        return snapshot;
      }
      let _ = self.receiver.changed().await;
    }
  }

  /// Waits until the entry reaches `Success` or `Error` with nothing in flight.
  pub async fn settled(&mut self) -> QuerySnapshot<T> {
    self.wait_for(QuerySnapshot::is_settled).await
  }

  /// Forces a new fetch for this observer's key, replacing any inflight one.
  pub fn refetch(&self) -> bool {
    let pending = {
      let mut state = self.entry.lock();
      fetch::invalidate_locked(&self.shared, &self.entry, &mut state)
    };
    fetch::spawn(&self.shared, pending)
  }

  /// Detaches from the entry. Equivalent to dropping the observer.
  pub fn unsubscribe(mut self) {
    self.detach();
  }
}

impl<T> Observer<T> {
  fn detach(&mut self) {
    if !self.attached {
      return;
    }
    self.attached = false;
    let remaining = self.entry.detach();
    trace!(key = %self.entry.key(), observer = self.id.0, remaining, "observer unsubscribed");
  }
}

impl<T> Drop for Observer<T> {
  fn drop(&mut self) {
    self.detach();
  }
}
