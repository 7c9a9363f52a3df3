use crate::config::QueryConfig;
use crate::entry::FetchToken;
use crate::metrics::Metrics;
use crate::runtime::{InflightTracker, TaskSpawner};
use crate::store::ShardedStore;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// The internal, thread-safe core of the query client.
pub(crate) struct ClientShared {
  pub(crate) config: QueryConfig,
  pub(crate) store: ShardedStore,
  pub(crate) metrics: Metrics,
  pub(crate) spawner: Arc<dyn TaskSpawner>,
  pub(crate) inflight: Arc<InflightTracker>,
  next_token: AtomicU64,
  next_id: AtomicU64,
  online: AtomicBool,
  closed: AtomicBool,
  closed_notify: Notify,
}

impl fmt::Debug for ClientShared {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ClientShared")
      .field("config", &self.config)
      .field("store", &self.store)
      .field("inflight", &self.inflight.count())
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl ClientShared {
  pub(crate) fn new(config: QueryConfig, spawner: Arc<dyn TaskSpawner>) -> Self {
    Self {
      store: ShardedStore::new(config.shards),
      config,
      metrics: Metrics::new(),
      spawner,
      inflight: Arc::new(InflightTracker::default()),
      next_token: AtomicU64::new(1),
      next_id: AtomicU64::new(1),
      online: AtomicBool::new(true),
      closed: AtomicBool::new(false),
      closed_notify: Notify::new(),
    }
  }

  #[inline]
  pub(crate) fn next_token(&self) -> FetchToken {
    self.next_token.fetch_add(1, Ordering::Relaxed)
  }

  /// Ids for observers and mutation runs.
  #[inline]
  pub(crate) fn next_id(&self) -> u64 {
    self.next_id.fetch_add(1, Ordering::Relaxed)
  }

  #[inline]
  pub(crate) fn is_online(&self) -> bool {
    self.online.load(Ordering::Acquire)
  }

  /// Returns the previous connectivity state.
  pub(crate) fn set_online(&self, online: bool) -> bool {
    self.online.swap(online, Ordering::AcqRel)
  }

  #[inline]
  pub(crate) fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  /// Returns `false` if the client was already closed.
  pub(crate) fn close(&self) -> bool {
    let first = !self.closed.swap(true, Ordering::AcqRel);
    if first {
      self.closed_notify.notify_waiters();
    }
    first
  }

  /// A future that resolves when `close` is called after its creation.
  pub(crate) fn closed_notified(&self) -> Notified<'_> {
    self.closed_notify.notified()
  }
}
