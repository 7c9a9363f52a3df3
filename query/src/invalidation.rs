use crate::entry::QueryEntry;
use crate::fetch;
use crate::key::QueryKey;
use crate::metrics::Metrics;
use crate::shared::ClientShared;
use crate::time;

use std::sync::Arc;

use tracing::debug;

/// Collects the live entries matched by any of `targets`, each entry once.
fn matching_entries(shared: &ClientShared, targets: &[QueryKey]) -> Vec<Arc<QueryEntry>> {
  let (entries, evicted) = shared.store.for_each_matching(
    |key| targets.iter().any(|target| target.is_prefix_of(key)),
    time::now(),
    shared.config.entry_grace_period,
  );
  Metrics::add(&shared.metrics.entries_evicted, evicted);
  entries
}

/// Marks every entry at or below any of `targets` stale and refetches those
/// that have observers. Returns the number of entries marked.
///
/// An entry matched by several overlapping targets in the same call is
/// handled once. Unobserved entries stay stale until their next subscription;
/// a fetch already running for one is kept and its result stored as stale.
pub(crate) fn invalidate(shared: &Arc<ClientShared>, targets: &[QueryKey]) -> usize {
  if targets.is_empty() {
    return 0;
  }
  let entries = matching_entries(shared, targets);
  let mut refetched = 0;

  for entry in &entries {
    let pending = {
      let mut state = entry.lock();
      if state.observer_count > 0 {
        fetch::invalidate_locked(shared, entry, &mut state)
      } else {
        // The running fetch still lands, but its result must not count as fresh.
        state.invalidated = true;
        if state.inflight.is_some() {
          state.invalidated_in_flight = true;
        }
        entry.publish(&state);
        None
      }
    };
    if fetch::spawn(shared, pending) {
      refetched += 1;
    }
  }

  Metrics::add(&shared.metrics.invalidations, entries.len());
  debug!(targets = ?targets, matched = entries.len(), refetched, "invalidated queries");
  entries.len()
}

/// Drops unobserved entries at or below any of `targets`. Entries that still
/// have observers are invalidated instead. Returns the number removed.
pub(crate) fn remove(shared: &Arc<ClientShared>, targets: &[QueryKey]) -> usize {
  if targets.is_empty() {
    return 0;
  }
  let entries = matching_entries(shared, targets);
  let mut removed = 0;
  let mut observed = Vec::new();

  for entry in entries {
    let dropped = shared
      .store
      .remove_if(entry.key(), |candidate| {
        let mut state = candidate.lock();
        if state.observer_count > 0 {
          return false;
        }
        if state.inflight.is_some() {
          state.abandon_fetch();
        }
        true
      })
      .is_some();

    if dropped {
      removed += 1;
    } else {
      observed.push(entry.key().clone());
    }
  }

  Metrics::add(&shared.metrics.entries_evicted, removed);
  debug!(targets = ?targets, removed, kept = observed.len(), "removed queries");
  if !observed.is_empty() {
    invalidate(shared, &observed);
  }
  removed
}
