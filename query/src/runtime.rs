use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A trait for spawning a future onto an asynchronous runtime.
///
/// Fetch tasks still use tokio timers for backoff and timeouts, so the
/// spawned futures must run inside a tokio runtime context.
pub trait TaskSpawner: Send + Sync + 'static {
  /// Spawns a type-erased future.
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>);
}

/// Spawns onto the tokio runtime that was current when the client was built.
#[derive(Debug, Clone)]
pub struct TokioSpawner(tokio::runtime::Handle);

impl TokioSpawner {
  /// Creates a spawner bound to the current Tokio runtime, if there is one.
  pub fn try_current() -> Option<Self> {
    tokio::runtime::Handle::try_current().ok().map(Self)
  }

  pub fn from_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }
}

impl TaskSpawner for TokioSpawner {
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
    self.0.spawn(future);
  }
}

/// Counts running fetch tasks so that shutdown can wait for them to drain.
#[derive(Debug, Default)]
pub(crate) struct InflightTracker {
  count: AtomicUsize,
  drained: Notify,
}

impl InflightTracker {
  pub(crate) fn track(self: &Arc<Self>) -> InflightGuard {
    self.count.fetch_add(1, Ordering::AcqRel);
    InflightGuard {
      tracker: Arc::clone(self),
    }
  }

  pub(crate) fn count(&self) -> usize {
    self.count.load(Ordering::Acquire)
  }

  /// Resolves once no tracked task is running.
  pub(crate) async fn drained(&self) {
    loop {
      // Register interest before checking, so a release between the check
      // and the await is not missed.
      let notified = self.drained.notified();
      if self.count() == 0 {
        return;
      }
      notified.await;
    }
  }
}

/// Released when the fetch task that holds it finishes or is dropped.
pub(crate) struct InflightGuard {
  tracker: Arc<InflightTracker>,
}

impl Drop for InflightGuard {
  fn drop(&mut self) {
    if self.tracker.count.fetch_sub(1, Ordering::AcqRel) == 1 {
      self.tracker.drained.notify_waiters();
    }
  }
}
