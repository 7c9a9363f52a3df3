use crate::error::QueryError;
use crate::fetcher::ErasedFetcher;
use crate::key::QueryKey;
use crate::snapshot::{ErasedData, FetchStatus, QueryStatus, RawSnapshot};
use crate::time::{self, Instant};

use std::fmt;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;

/// Identifies one issued fetch. A result is applied only while its token is
/// still the entry's inflight token.
pub(crate) type FetchToken = u64;

/// The mutable state of a cache entry. Only touched under the entry lock.
pub(crate) struct EntryState {
  pub(crate) data: Option<ErasedData>,
  pub(crate) error: Option<QueryError>,
  pub(crate) status: QueryStatus,
  pub(crate) fetch_status: FetchStatus,
  pub(crate) updated_at: Option<Instant>,
  pub(crate) stale_time: Duration,
  pub(crate) invalidated: bool,
  /// Set when the entry is invalidated while its current fetch is kept running.
  /// That fetch's result is stored but does not count as fresh.
  pub(crate) invalidated_in_flight: bool,
  pub(crate) retry_count: u32,
  pub(crate) inflight: Option<FetchToken>,
  pub(crate) observer_count: usize,
  /// Set when `observer_count` drops to zero; starts the grace period.
  pub(crate) orphaned_at: Option<Instant>,
  pub(crate) fetcher: Option<ErasedFetcher>,
}

impl EntryState {
  fn new(stale_time: Duration) -> Self {
    Self {
      data: None,
      error: None,
      status: QueryStatus::Idle,
      fetch_status: FetchStatus::Idle,
      updated_at: None,
      stale_time,
      invalidated: false,
      invalidated_in_flight: false,
      retry_count: 0,
      inflight: None,
      observer_count: 0,
      orphaned_at: None,
      fetcher: None,
    }
  }

  pub(crate) fn is_stale(&self, now: Instant) -> bool {
    if self.invalidated {
      return true;
    }
    match self.updated_at {
      Some(updated_at) => time::elapsed_beyond(updated_at, now, self.stale_time),
      None => true,
    }
  }

  pub(crate) fn begin_fetch(&mut self, token: FetchToken) {
    self.status = QueryStatus::Pending;
    self.fetch_status = FetchStatus::Fetching;
    self.inflight = Some(token);
    self.retry_count = 0;
    self.invalidated_in_flight = false;
  }

  /// Holds the query in `Pending` without network activity until the client is online.
  pub(crate) fn pause(&mut self) {
    self.status = QueryStatus::Pending;
    self.fetch_status = FetchStatus::Paused;
    self.inflight = None;
  }

  pub(crate) fn apply_success(&mut self, data: ErasedData, now: Instant) {
    self.data = Some(data);
    self.error = None;
    self.updated_at = Some(now);
    self.invalidated = self.invalidated_in_flight;
    self.invalidated_in_flight = false;
    self.status = QueryStatus::Success;
    self.fetch_status = FetchStatus::Idle;
    self.retry_count = 0;
    self.inflight = None;
  }

  pub(crate) fn apply_error(&mut self, error: QueryError) {
    self.error = Some(error);
    self.status = QueryStatus::Error;
    self.fetch_status = FetchStatus::Idle;
    self.inflight = None;
  }

  /// Drops any inflight or paused fetch and returns the status to whatever
  /// the held data or error implies.
  pub(crate) fn abandon_fetch(&mut self) {
    self.inflight = None;
    self.fetch_status = FetchStatus::Idle;
    self.status = if self.error.is_some() {
      QueryStatus::Error
    } else if self.data.is_some() {
      QueryStatus::Success
    } else {
      QueryStatus::Idle
    };
  }

  /// An entry may be dropped once it has had no observers for the whole grace period.
  pub(crate) fn is_evictable(&self, now: Instant, grace: Duration) -> bool {
    self.observer_count == 0
      && self.inflight.is_none()
      && self
        .orphaned_at
        .is_some_and(|since| time::elapsed_beyond(since, now, grace))
  }

  pub(crate) fn snapshot(&self) -> RawSnapshot {
    RawSnapshot {
      data: self.data.clone(),
      error: self.error.clone(),
      status: self.status,
      fetch_status: self.fetch_status,
      updated_at: self.updated_at,
      retry_count: self.retry_count,
      is_invalidated: self.invalidated,
    }
  }
}

/// A single canonical cache entry, shared by the store, its observers and
/// any fetch task running for it.
pub(crate) struct QueryEntry {
  key: QueryKey,
  state: Mutex<EntryState>,
  sender: watch::Sender<RawSnapshot>,
}

impl fmt::Debug for QueryEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueryEntry")
      .field("key", &self.key)
      .finish_non_exhaustive()
  }
}

impl QueryEntry {
  pub(crate) fn new(key: QueryKey, stale_time: Duration) -> Self {
    let (sender, _) = watch::channel(RawSnapshot::idle());
    Self {
      key,
      state: Mutex::new(EntryState::new(stale_time)),
      sender,
    }
  }

  #[inline]
  pub(crate) fn key(&self) -> &QueryKey {
    &self.key
  }

  #[inline]
  pub(crate) fn lock(&self) -> MutexGuard<'_, EntryState> {
    self.state.lock()
  }

  /// Broadcasts the state to every observer. Called with the entry lock held
  /// so that observers see updates in the order they were applied.
  pub(crate) fn publish(&self, state: &EntryState) {
    self.sender.send_replace(state.snapshot());
  }

  pub(crate) fn watch(&self) -> watch::Receiver<RawSnapshot> {
    self.sender.subscribe()
  }

  /// Registers one more observer and cancels any pending grace period.
  pub(crate) fn attach(&self) {
    let mut state = self.state.lock();
    state.observer_count += 1;
    state.orphaned_at = None;
  }

  /// Removes one observer. Returns the remaining count.
  pub(crate) fn detach(&self) -> usize {
    let mut state = self.state.lock();
    state.observer_count = state.observer_count.saturating_sub(1);
    if state.observer_count == 0 {
      state.orphaned_at = Some(time::now());
    }
    state.observer_count
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query_key;
  use std::sync::Arc;

  #[tokio::test(start_paused = true)]
  async fn staleness_follows_stale_time_and_invalidation() {
    let entry = QueryEntry::new(query_key!["user", 1], Duration::from_millis(5000));
    let mut state = entry.lock();
    let start = time::now();
    assert!(state.is_stale(start), "never-fetched entries are stale");

    state.begin_fetch(1);
    state.apply_success(Arc::new(1u32), start);
    assert!(!state.is_stale(start + Duration::from_millis(5000)));
    assert!(state.is_stale(start + Duration::from_millis(5001)));

    state.invalidated = true;
    assert!(state.is_stale(start));
  }

  #[tokio::test(start_paused = true)]
  async fn refetch_keeps_previous_data() {
    let entry = QueryEntry::new(query_key!["user", 1], Duration::ZERO);
    let mut state = entry.lock();
    state.begin_fetch(1);
    state.apply_success(Arc::new("A"), time::now());
    state.begin_fetch(2);

    assert_eq!(state.status, QueryStatus::Pending);
    assert_eq!(state.fetch_status, FetchStatus::Fetching);
    assert!(state.data.is_some());

    state.abandon_fetch();
    assert_eq!(state.status, QueryStatus::Success);
    assert_eq!(state.inflight, None);
  }

  #[tokio::test(start_paused = true)]
  async fn invalidation_during_a_flight_outlives_its_result() {
    let entry = QueryEntry::new(query_key!["users"], Duration::from_secs(60));
    let mut state = entry.lock();
    state.begin_fetch(1);
    state.invalidated = true;
    state.invalidated_in_flight = true;

    state.apply_success(Arc::new(1u32), time::now());
    assert_eq!(state.status, QueryStatus::Success);
    assert!(state.data.is_some());
    assert!(state.is_stale(time::now()));

    state.begin_fetch(2);
    state.apply_success(Arc::new(2u32), time::now());
    assert!(!state.is_stale(time::now()));
  }

  #[tokio::test(start_paused = true)]
  async fn grace_period_starts_when_last_observer_leaves() {
    let entry = QueryEntry::new(query_key!["users"], Duration::ZERO);
    let grace = Duration::from_secs(1);
    entry.attach();
    entry.attach();
    assert_eq!(entry.detach(), 1);
    assert!(!entry.lock().is_evictable(time::now() + grace * 2, grace));

    assert_eq!(entry.detach(), 0);
    let now = time::now();
    assert!(!entry.lock().is_evictable(now + grace, grace));
    assert!(entry.lock().is_evictable(now + grace + Duration::from_millis(1), grace));
  }
}
