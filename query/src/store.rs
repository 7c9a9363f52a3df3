use crate::entry::QueryEntry;
use crate::key::QueryKey;
use crate::time::Instant;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

type ShardMap = HashMap<QueryKey, Arc<QueryEntry>, ahash::RandomState>;

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
fn hash_key<H: BuildHasher>(hasher: &H, key: &QueryKey) -> u64 {
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

/// The result of attaching an observer to the store.
pub(crate) struct Attached {
  pub(crate) entry: Arc<QueryEntry>,
  pub(crate) created: bool,
  pub(crate) evicted: usize,
}

/// The single source of truth: canonical key identity to cache entry,
/// partitioned into independently locked shards.
///
/// Entries past their grace period are dropped lazily whenever a shard is
/// locked for writing. There is no background sweep.
pub(crate) struct ShardedStore {
  shards: Box<[CachePadded<RwLock<ShardMap>>]>,
  hasher: ahash::RandomState,
}

impl fmt::Debug for ShardedStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("num_shards", &self.shards.len())
      .finish()
  }
}

impl ShardedStore {
  /// Creates a new `ShardedStore`. `num_shards` must be a non-zero power of two.
  pub(crate) fn new(num_shards: usize) -> Self {
    let hasher = ahash::RandomState::new();
    let shards = (0..num_shards)
      .map(|_| CachePadded::new(RwLock::new(HashMap::with_hasher(hasher.clone()))))
      .collect::<Vec<_>>();

    Self {
      shards: shards.into_boxed_slice(),
      hasher,
    }
  }

  #[inline]
  fn get_shard(&self, key: &QueryKey) -> &RwLock<ShardMap> {
    let hash = hash_key(&self.hasher, key);
    &self.shards[hash as usize & (self.shards.len() - 1)]
  }

  /// Looks up an entry without creating it.
  pub(crate) fn get(&self, key: &QueryKey) -> Option<Arc<QueryEntry>> {
    self.get_shard(key).read().get(key).cloned()
  }

  /// Returns the canonical entry for `key`, creating it if absent, and
  /// registers an observer on it before the shard lock is released so a
  /// concurrent sweep can never drop an entry that is being subscribed to.
  pub(crate) fn attach(
    &self,
    key: &QueryKey,
    stale_time: Duration,
    now: Instant,
    grace: Duration,
  ) -> Attached {
    let mut guard = self.get_shard(key).write();
    let evicted = evict_idle(&mut guard, now, grace);

    let mut created = false;
    let entry = guard
      .entry(key.clone())
      .or_insert_with(|| {
        created = true;
        Arc::new(QueryEntry::new(key.clone(), stale_time))
      })
      .clone();
    entry.attach();

    Attached {
      entry,
      created,
      evicted,
    }
  }

  /// Removes the entry for `key` if `predicate` accepts it.
  pub(crate) fn remove_if(
    &self,
    key: &QueryKey,
    predicate: impl FnOnce(&QueryEntry) -> bool,
  ) -> Option<Arc<QueryEntry>> {
    let mut guard = self.get_shard(key).write();
    if guard.get(key).is_some_and(|entry| predicate(&**entry)) {
      guard.remove(key)
    } else {
      None
    }
  }

  /// Collects every live entry whose key satisfies `predicate`, sweeping
  /// expired entries along the way. Returns the matches and the number evicted.
  pub(crate) fn for_each_matching(
    &self,
    predicate: impl Fn(&QueryKey) -> bool,
    now: Instant,
    grace: Duration,
  ) -> (Vec<Arc<QueryEntry>>, usize) {
    let mut matches = Vec::new();
    let mut evicted = 0;
    for shard in self.iter_shards() {
      let mut guard = shard.write();
      evicted += evict_idle(&mut guard, now, grace);
      matches.extend(
        guard
          .iter()
          .filter(|(key, _)| predicate(key))
          .map(|(_, entry)| Arc::clone(entry)),
      );
    }
    (matches, evicted)
  }

  /// Drops every entry past its grace period. Returns the number evicted.
  pub(crate) fn sweep(&self, now: Instant, grace: Duration) -> usize {
    self
      .iter_shards()
      .map(|shard| evict_idle(&mut shard.write(), now, grace))
      .sum()
  }

  /// Snapshot of every entry currently stored, without sweeping.
  pub(crate) fn entries(&self) -> Vec<Arc<QueryEntry>> {
    self
      .iter_shards()
      .flat_map(|shard| shard.read().values().cloned().collect::<Vec<_>>())
      .collect()
  }

  pub(crate) fn len(&self) -> usize {
    self.iter_shards().map(|shard| shard.read().len()).sum()
  }

  fn iter_shards(&self) -> impl Iterator<Item = &RwLock<ShardMap>> {
    self.shards.iter().map(|padded_lock| &**padded_lock)
  }
}

fn evict_idle(map: &mut ShardMap, now: Instant, grace: Duration) -> usize {
  let before = map.len();
  map.retain(|key, entry| {
    let keep = !entry.lock().is_evictable(now, grace);
    if !keep {
      tracing::debug!(key = %key, "evicting entry after grace period");
    }
    keep
  });
  before - map.len()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query_key;
  use crate::time;

  #[tokio::test(start_paused = true)]
  async fn attach_returns_one_entry_per_identity() {
    let store = ShardedStore::new(4);
    let now = time::now();
    let grace = Duration::from_secs(60);

    let first = store.attach(&query_key!["user", 1], Duration::ZERO, now, grace);
    let second = store.attach(&query_key!["user", 1], Duration::ZERO, now, grace);
    let other = store.attach(&query_key!["user", "1"], Duration::ZERO, now, grace);

    assert!(first.created);
    assert!(!second.created);
    assert!(Arc::ptr_eq(&first.entry, &second.entry));
    assert!(!Arc::ptr_eq(&first.entry, &other.entry));
    assert_eq!(first.entry.lock().observer_count, 2);
    assert_eq!(store.len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn orphaned_entries_are_swept_lazily() {
    let store = ShardedStore::new(1);
    let grace = Duration::from_secs(1);
    let attached = store.attach(&query_key!["users"], Duration::ZERO, time::now(), grace);
    attached.entry.detach();

    let (matches, evicted) = store.for_each_matching(|_| true, time::now(), grace);
    assert_eq!(matches.len(), 1);
    assert_eq!(evicted, 0);

    let later = time::now() + Duration::from_secs(2);
    let (matches, evicted) = store.for_each_matching(|_| true, later, grace);
    assert!(matches.is_empty());
    assert_eq!(evicted, 1);
    assert_eq!(store.len(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn matching_respects_the_predicate() {
    let store = ShardedStore::new(2);
    let now = time::now();
    let grace = Duration::from_secs(1);
    for key in [query_key!["users"], query_key!["users", 1], query_key!["user", 1]] {
      store.attach(&key, Duration::ZERO, now, grace);
    }

    let prefix = query_key!["users"];
    let (matches, _) = store.for_each_matching(|key| prefix.is_prefix_of(key), now, grace);
    let mut identities: Vec<_> = matches.iter().map(|e| e.key().to_string()).collect();
    identities.sort();
    assert_eq!(identities, vec![r#"["users",i1]"#, r#"["users"]"#]);
  }
}
