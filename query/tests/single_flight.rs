mod common;

use common::*;
use fibre_query::{query_key, QueryStatus};
use std::sync::Arc;
use tokio::sync::Barrier;

#[tokio::test(start_paused = true)]
async fn concurrent_subscriptions_share_one_fetch() {
  let client = test_client();
  let log = CallLog::default();
  let key = query_key!["user", 1];

  let mut observers: Vec<_> = (0..10)
    .map(|_| client.subscribe(key.clone(), echo_fetcher(&log, ms(100))))
    .collect();

  assert_eq!(log.count(&key), 1);
  assert_eq!(client.fetching_count(None), 1);

  for observer in &mut observers {
    let snapshot = observer.settled().await;
    assert_eq!(snapshot.status, QueryStatus::Success);
    assert_eq!(snapshot.data.as_deref(), Some(&key.to_string()));
  }

  let metrics = client.metrics();
  assert_eq!(metrics.fetches_started, 1);
  assert_eq!(metrics.fetches_joined, 9);
  assert_eq!(metrics.entries_created, 1);
  assert_eq!(client.entry_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn thundering_herd_across_tasks() {
  let client = test_client();
  let log = CallLog::default();
  let key = query_key!["report", "daily"];
  let num_tasks = 20;

  let barrier = Arc::new(Barrier::new(num_tasks));
  let mut tasks = vec![];

  for _ in 0..num_tasks {
    let client = client.clone();
    let barrier = barrier.clone();
    let key = key.clone();
    let fetcher = echo_fetcher(&log, ms(100));
    tasks.push(tokio::spawn(async move {
      barrier.wait().await;
      let mut observer = client.subscribe(key, fetcher);
      observer.settled().await
    }));
  }

  for task in tasks {
    let snapshot = task.await.unwrap();
    assert!(snapshot.is_success());
  }

  assert_eq!(log.count(&key), 1, "fetcher should run exactly once");
}

#[tokio::test(start_paused = true)]
async fn distinct_keys_fetch_independently() {
  let client = test_client();
  let log = CallLog::default();

  let mut one = client.subscribe(query_key!["user", 1], echo_fetcher(&log, ms(10)));
  let mut other = client.subscribe(query_key!["user", "1"], echo_fetcher(&log, ms(10)));

  one.settled().await;
  other.settled().await;
  assert_eq!(log.total(), 2);
  assert_eq!(client.entry_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn unsubscribing_does_not_cancel_the_fetch() {
  let client = test_client();
  let log = CallLog::default();
  let key = query_key!["user", 5];

  let first = client.subscribe(key.clone(), echo_fetcher(&log, ms(100)));
  drop(first);

  let mut second = client.subscribe(key.clone(), echo_fetcher(&log, ms(100)));
  let snapshot = second.settled().await;
  assert!(snapshot.is_success());
  assert_eq!(log.count(&key), 1);
}
