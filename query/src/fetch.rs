//! The fetch coordinator: single-flight fetch cycles with retry and backoff.
//!
//! Every state change happens under the entry lock and is published before
//! the lock is released. The fetcher call and the backoff delay are the only
//! suspension points, and no lock is held across them.

use crate::entry::{EntryState, FetchToken, QueryEntry};
use crate::error::{FetchError, QueryError};
use crate::fetcher::ErasedFetcher;
use crate::key::QueryKey;
use crate::metrics::Metrics;
use crate::runtime::InflightGuard;
use crate::shared::ClientShared;
use crate::snapshot::{ErasedData, FetchStatus};
use crate::time;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use tracing::{debug, trace, warn};

type Attempt = BoxFuture<'static, Result<ErasedData, FetchError>>;

/// A fetch cycle that has been registered on its entry but not yet spawned.
pub(crate) struct PendingFetch {
  entry: Arc<QueryEntry>,
  token: FetchToken,
  fetcher: ErasedFetcher,
}

enum Step {
  Done,
  Retry(Duration),
}

/// Starts a fetch for `entry` unless one is already in flight or the data is fresh.
///
/// Returns `true` if a new fetch cycle was spawned.
pub(crate) fn ensure_fresh(shared: &Arc<ClientShared>, entry: &Arc<QueryEntry>) -> bool {
  let pending = {
    let mut state = entry.lock();
    if let Some(token) = state.inflight {
      Metrics::incr(&shared.metrics.fetches_joined);
      trace!(key = %entry.key(), token, "joining inflight fetch");
      return false;
    }
    if !state.is_stale(time::now()) {
      return false;
    }
    begin_locked(shared, entry, &mut state)
  };
  spawn(shared, pending)
}

/// Replaces any inflight fetch with a new one. The old fetch keeps running
/// but its result will be dropped on completion.
fn supersede_locked(
  shared: &ClientShared,
  entry: &Arc<QueryEntry>,
  state: &mut EntryState,
) -> Option<PendingFetch> {
  if let Some(token) = state.inflight.take() {
    trace!(key = %entry.key(), token, "superseding inflight fetch");
  }
  let pending = begin_locked(shared, entry, state);
  if pending.is_none() && state.fetch_status == FetchStatus::Fetching {
    state.abandon_fetch();
    entry.publish(state);
  }
  pending
}

/// Marks a locked entry stale and replaces any inflight fetch with a new one.
///
/// Observers are told about the flag even when no fetch can start (offline,
/// or shut down).
pub(crate) fn invalidate_locked(
  shared: &ClientShared,
  entry: &Arc<QueryEntry>,
  state: &mut EntryState,
) -> Option<PendingFetch> {
  let was_invalidated = state.invalidated;
  state.invalidated = true;
  let pending = supersede_locked(shared, entry, state);
  if pending.is_none() && !was_invalidated {
    entry.publish(state);
  }
  pending
}

/// Registers a new fetch cycle on a locked entry that has no inflight fetch.
pub(crate) fn begin_locked(
  shared: &ClientShared,
  entry: &Arc<QueryEntry>,
  state: &mut EntryState,
) -> Option<PendingFetch> {
  if shared.is_closed() {
    state.apply_error(QueryError::Shutdown);
    entry.publish(state);
    return None;
  }
  let fetcher = state.fetcher.clone()?;

  if !shared.is_online() {
    if state.fetch_status != FetchStatus::Paused {
      state.pause();
      entry.publish(state);
      debug!(key = %entry.key(), "client offline, fetch paused");
    }
    return None;
  }

  let token = shared.next_token();
  state.begin_fetch(token);
  entry.publish(state);
  Metrics::incr(&shared.metrics.fetches_started);
  debug!(key = %entry.key(), token, "fetch issued");

  Some(PendingFetch {
    entry: Arc::clone(entry),
    token,
    fetcher,
  })
}

/// Spawns a registered fetch cycle. Must be called after the entry lock is released.
pub(crate) fn spawn(shared: &Arc<ClientShared>, pending: Option<PendingFetch>) -> bool {
  let Some(pending) = pending else {
    return false;
  };
  let guard = shared.inflight.track();
  // The fetcher is invoked now, at issue time; the task only drives its future.
  let first = call_fetcher(&pending.fetcher, pending.entry.key().clone());
  shared
    .spawner
    .spawn(Box::pin(run(Arc::clone(shared), pending, first, guard)));
  true
}

async fn run(shared: Arc<ClientShared>, pending: PendingFetch, first: Attempt, _guard: InflightGuard) {
  let PendingFetch {
    entry,
    token,
    fetcher,
  } = pending;
  let mut next = Some(first);

  loop {
    let fetch = match next.take() {
      Some(fetch) => fetch,
      None => call_fetcher(&fetcher, entry.key().clone()),
    };
    let outcome = attempt(&shared, fetch).await;
    let delay = match settle(&shared, &entry, token, outcome) {
      Step::Done => return,
      Step::Retry(delay) => delay,
    };

    let closed = shared.closed_notified();
    if !shared.is_closed() {
      tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = closed => {}
      }
    }

    if !still_current(&shared, &entry, token) {
      return;
    }
  }
}

/// Calls the fetcher, turning a panic (in the call or in its future) into a failed attempt.
fn call_fetcher(fetcher: &ErasedFetcher, key: QueryKey) -> Attempt {
  match panic::catch_unwind(AssertUnwindSafe(|| fetcher(key))) {
    Ok(fetch) => AssertUnwindSafe(fetch)
      .catch_unwind()
      .map(|result| result.unwrap_or_else(|payload| Err(panicked(payload))))
      .boxed(),
    Err(payload) => future::ready(Err(panicked(payload))).boxed(),
  }
}

fn panicked(payload: Box<dyn Any + Send>) -> FetchError {
  let message = payload
    .downcast_ref::<&str>()
    .map(|message| (*message).to_owned())
    .or_else(|| payload.downcast_ref::<String>().cloned())
    .unwrap_or_else(|| String::from("unknown panic"));
  FetchError::transient(format!("fetcher panicked: {message}"))
}

async fn attempt(shared: &ClientShared, fetch: Attempt) -> Result<ErasedData, FetchError> {
  match shared.config.fetch_timeout {
    Some(limit) => tokio::time::timeout(limit, fetch)
      .await
      .unwrap_or(Err(FetchError::Timeout(limit))),
    None => fetch.await,
  }
}

/// Applies the outcome of one attempt, or decides to retry it.
fn settle(
  shared: &ClientShared,
  entry: &QueryEntry,
  token: FetchToken,
  outcome: Result<ErasedData, FetchError>,
) -> Step {
  let key = entry.key();
  let mut state = entry.lock();
  if state.inflight != Some(token) {
    Metrics::incr(&shared.metrics.superseded);
    trace!(key = %key, token, "dropping superseded fetch result");
    return Step::Done;
  }

  let err = match outcome {
    Ok(data) => {
      state.apply_success(data, time::now());
      entry.publish(&state);
      Metrics::incr(&shared.metrics.fetch_successes);
      debug!(key = %key, token, "fetch succeeded");
      return Step::Done;
    }
    Err(err) => err,
  };

  Metrics::incr(&shared.metrics.fetch_failures);
  state.retry_count += 1;
  let failures = state.retry_count;

  if failures > shared.config.retry_limit {
    warn!(key = %key, token, attempts = failures, error = %err, "fetch failed, retries exhausted");
    Metrics::incr(&shared.metrics.terminal_errors);
    state.apply_error(QueryError::RetriesExhausted {
      attempts: failures,
      last: err,
    });
    entry.publish(&state);
    return Step::Done;
  }

  if shared.is_closed() {
    state.apply_error(QueryError::Shutdown);
    entry.publish(&state);
    return Step::Done;
  }

  // Still `Fetching`; only the failure count changes.
  entry.publish(&state);
  let delay = retry_delay(
    shared.config.backoff_base,
    shared.config.backoff_cap,
    failures,
  );
  Metrics::incr(&shared.metrics.retries);
  debug!(key = %key, token, attempt = failures, ?delay, error = %err, "fetch failed, retry scheduled");
  Step::Retry(delay)
}

/// Checks, after a backoff delay, that the cycle has not been superseded or shut down.
fn still_current(shared: &ClientShared, entry: &QueryEntry, token: FetchToken) -> bool {
  let mut state = entry.lock();
  if state.inflight != Some(token) {
    Metrics::incr(&shared.metrics.superseded);
    trace!(key = %entry.key(), token, "retry superseded");
    return false;
  }
  if shared.is_closed() {
    state.apply_error(QueryError::Shutdown);
    entry.publish(&state);
    return false;
  }
  true
}

/// Delay before retry number `retry` (1-based): `base * 2^(retry - 1)`, capped.
pub(crate) fn retry_delay(base: Duration, cap: Duration, retry: u32) -> Duration {
  let factor = 1u32
    .checked_shl(retry.saturating_sub(1))
    .unwrap_or(u32::MAX);
  base.checked_mul(factor).map_or(cap, |delay| delay.min(cap))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn backoff_doubles_until_the_cap() {
    let base = Duration::from_millis(100);
    let cap = Duration::from_millis(1000);

    assert_eq!(retry_delay(base, cap, 1), Duration::from_millis(100));
    assert_eq!(retry_delay(base, cap, 2), Duration::from_millis(200));
    assert_eq!(retry_delay(base, cap, 4), Duration::from_millis(800));
    assert_eq!(retry_delay(base, cap, 5), cap);
    assert_eq!(retry_delay(base, cap, 64), cap);
  }

  #[tokio::test]
  async fn a_panicking_fetcher_becomes_a_failed_attempt() {
    let in_call: ErasedFetcher = Arc::new(|_key: QueryKey| -> Attempt { panic!("bad key") });
    let in_future: ErasedFetcher =
      Arc::new(|_key: QueryKey| -> Attempt { async { panic!("decode failed") }.boxed() });

    let err = call_fetcher(&in_call, QueryKey::from("a")).await.err();
    assert!(err.is_some_and(|err| err.to_string().contains("bad key")));
    let err = call_fetcher(&in_future, QueryKey::from("b")).await.err();
    assert!(err.is_some_and(|err| err.to_string().contains("decode failed")));
  }

  #[test]
  fn zero_base_never_waits() {
    assert_eq!(retry_delay(Duration::ZERO, Duration::from_secs(1), 3), Duration::ZERO);
  }
}
