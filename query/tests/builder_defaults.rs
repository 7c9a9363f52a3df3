mod common;

use common::*;
use fibre_query::{query_key, BuildError, QueryClient, QueryConfig, TaskSpawner, TokioSpawner};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn config_defaults() {
  let config = QueryConfig::default();
  assert_eq!(config.stale_time, Duration::ZERO);
  assert_eq!(config.retry_limit, 3);
  assert_eq!(config.backoff_base, Duration::from_secs(1));
  assert_eq!(config.backoff_cap, Duration::from_secs(30));
  assert!(config.refetch_on_activate);
  assert_eq!(config.entry_grace_period, Duration::from_secs(300));
  assert_eq!(config.fetch_timeout, None);
  assert!(config.shards > 0);
}

#[tokio::test]
async fn shards_are_rounded_to_a_power_of_two() {
  let client = QueryClient::builder().shards(6).build().unwrap();
  assert_eq!(client.config().shards, 8);
}

#[tokio::test]
async fn invalid_configurations_are_rejected() {
  let zero = QueryClient::builder().shards(0).build().unwrap_err();
  assert_eq!(zero, BuildError::ZeroShards);

  let inverted = QueryClient::builder()
    .backoff_base(Duration::from_secs(10))
    .backoff_cap(Duration::from_secs(1))
    .build()
    .unwrap_err();
  assert!(matches!(inverted, BuildError::BackoffBaseExceedsCap { .. }));
}

#[test]
fn building_outside_a_runtime_needs_a_spawner() {
  let error = QueryClient::new(QueryConfig::default()).unwrap_err();
  assert_eq!(error, BuildError::NoRuntime);
}

struct CountingSpawner {
  inner: TokioSpawner,
  spawned: AtomicUsize,
}

impl TaskSpawner for CountingSpawner {
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
    self.spawned.fetch_add(1, Ordering::SeqCst);
    self.inner.spawn(future);
  }
}

#[test]
fn a_custom_spawner_runs_the_fetches() {
  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_time()
    .build()
    .unwrap();
  let spawner = Arc::new(CountingSpawner {
    inner: TokioSpawner::from_handle(runtime.handle().clone()),
    spawned: AtomicUsize::new(0),
  });

  let client = QueryClient::builder()
    .spawner(spawner.clone())
    .build()
    .unwrap();
  let log = CallLog::default();

  runtime.block_on(async {
    let mut observer = client.subscribe(query_key!["remote"], echo_fetcher(&log, ms(5)));
    assert!(observer.settled().await.is_success());
  });
  assert_eq!(spawner.spawned.load(Ordering::SeqCst), 1);
}
