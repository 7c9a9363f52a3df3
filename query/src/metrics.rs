use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the query client.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub(crate) struct Metrics {
  // --- Fetch Coordinator ---
  pub(crate) fetches_started: CachePadded<AtomicU64>,
  pub(crate) fetches_joined: CachePadded<AtomicU64>,
  pub(crate) fetch_successes: CachePadded<AtomicU64>,
  pub(crate) fetch_failures: CachePadded<AtomicU64>,
  pub(crate) retries: CachePadded<AtomicU64>,
  pub(crate) terminal_errors: CachePadded<AtomicU64>,
  pub(crate) superseded: CachePadded<AtomicU64>,

  // --- Invalidation ---
  pub(crate) invalidations: CachePadded<AtomicU64>,

  // --- Store ---
  pub(crate) entries_created: CachePadded<AtomicU64>,
  pub(crate) entries_evicted: CachePadded<AtomicU64>,

  // --- Mutations ---
  pub(crate) mutations_succeeded: CachePadded<AtomicU64>,
  pub(crate) mutations_failed: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      fetches_started: CachePadded::new(AtomicU64::new(0)),
      fetches_joined: CachePadded::new(AtomicU64::new(0)),
      fetch_successes: CachePadded::new(AtomicU64::new(0)),
      fetch_failures: CachePadded::new(AtomicU64::new(0)),
      retries: CachePadded::new(AtomicU64::new(0)),
      terminal_errors: CachePadded::new(AtomicU64::new(0)),
      superseded: CachePadded::new(AtomicU64::new(0)),
      invalidations: CachePadded::new(AtomicU64::new(0)),
      entries_created: CachePadded::new(AtomicU64::new(0)),
      entries_evicted: CachePadded::new(AtomicU64::new(0)),
      mutations_succeeded: CachePadded::new(AtomicU64::new(0)),
      mutations_failed: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn add(counter: &AtomicU64, n: usize) {
    counter.fetch_add(n as u64, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    MetricsSnapshot {
      fetches_started: self.fetches_started.load(Ordering::Relaxed),
      fetches_joined: self.fetches_joined.load(Ordering::Relaxed),
      fetch_successes: self.fetch_successes.load(Ordering::Relaxed),
      fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
      retries: self.retries.load(Ordering::Relaxed),
      terminal_errors: self.terminal_errors.load(Ordering::Relaxed),
      superseded: self.superseded.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      entries_created: self.entries_created.load(Ordering::Relaxed),
      entries_evicted: self.entries_evicted.load(Ordering::Relaxed),
      mutations_succeeded: self.mutations_succeeded.load(Ordering::Relaxed),
      mutations_failed: self.mutations_failed.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the client's metrics.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
  /// Fetch cycles issued against the fetcher.
  pub fetches_started: u64,
  /// Subscriptions that joined an already inflight fetch instead of starting one.
  pub fetches_joined: u64,
  /// Fetch cycles that wrote fresh data.
  pub fetch_successes: u64,
  /// Individual failed attempts, including ones that were later retried.
  pub fetch_failures: u64,
  /// Retries scheduled after a failed attempt.
  pub retries: u64,
  /// Fetch cycles that ended in a terminal error.
  pub terminal_errors: u64,
  /// Results dropped because a newer fetch replaced theirs.
  pub superseded: u64,
  /// Entries marked stale by invalidation.
  pub invalidations: u64,
  pub entries_created: u64,
  /// Entries dropped after their grace period or by explicit removal.
  pub entries_evicted: u64,
  pub mutations_succeeded: u64,
  pub mutations_failed: u64,
  /// The number of seconds the client has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("fetches_started", &self.fetches_started)
      .field("fetches_joined", &self.fetches_joined)
      .field("fetch_successes", &self.fetch_successes)
      .field("fetch_failures", &self.fetch_failures)
      .field("retries", &self.retries)
      .field("terminal_errors", &self.terminal_errors)
      .field("superseded", &self.superseded)
      .field("invalidations", &self.invalidations)
      .field("entries_created", &self.entries_created)
      .field("entries_evicted", &self.entries_evicted)
      .field("mutations_succeeded", &self.mutations_succeeded)
      .field("mutations_failed", &self.mutations_failed)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
