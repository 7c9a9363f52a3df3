mod common;

use common::*;
use fibre_query::{query_key, FetchStatus, QueryStatus};
use tokio::time::{sleep, Instant};

#[tokio::test(start_paused = true)]
async fn first_subscription_fetches_and_settles() {
  let client = test_client();
  let log = CallLog::default();
  let key = query_key!["user", 1];

  let mut observer = client.subscribe(key.clone(), echo_fetcher(&log, ms(50)));
  assert_eq!(log.count(&key), 1, "the fetcher is called when the fetch is issued");
  let pending = observer.snapshot();
  assert_eq!(pending.status, QueryStatus::Pending);
  assert_eq!(pending.fetch_status, FetchStatus::Fetching);
  assert!(pending.data.is_none());

  let settled = observer.settled().await;
  assert_eq!(settled.status, QueryStatus::Success);
  assert_eq!(settled.data.as_deref(), Some(&key.to_string()));
  assert!(settled.updated_at.is_some());
  assert!(settled.error.is_none());
  assert_eq!(log.count(&key), 1);
}

#[tokio::test(start_paused = true)]
async fn fresh_data_is_shared_and_stale_data_is_revalidated() {
  let client = test_builder().stale_time(ms(5_000)).build().unwrap();
  let log = CallLog::default();
  let key = query_key!["user", 1];
  let start = Instant::now();

  // t=0: first observer triggers the only fetch of the fresh window.
  let mut a = client.subscribe(key.clone(), echo_fetcher(&log, ms(10)));
  let first = a.settled().await;

  sleep_until_offset(start, 100).await;
  let b = client.subscribe(key.clone(), echo_fetcher(&log, ms(10)));
  assert!(b.snapshot().is_success());

  sleep_until_offset(start, 200).await;
  let c = client.subscribe(key.clone(), echo_fetcher(&log, ms(10)));
  assert!(c.snapshot().is_success());
  assert_eq!(log.count(&key), 1, "fresh data must not be refetched");

  // t=6000: past the stale time, a new subscription revalidates.
  sleep_until_offset(start, 6_000).await;
  let mut d = client.subscribe(key.clone(), echo_fetcher(&log, ms(10)));
  assert_eq!(log.count(&key), 2);

  // Every observer keeps seeing the old data while the refetch runs.
  for snapshot in [b.snapshot(), c.snapshot(), d.snapshot()] {
    assert_eq!(snapshot.status, QueryStatus::Pending);
    assert!(snapshot.is_fetching());
    assert!(snapshot.data.is_some());
  }

  let refreshed = d.settled().await;
  assert!(refreshed.updated_at > first.updated_at);
  assert_eq!(a.snapshot().updated_at, refreshed.updated_at);
  assert_eq!(client.metrics().fetches_started, 2);
}

#[tokio::test(start_paused = true)]
async fn zero_stale_time_refetches_on_every_activation() {
  let client = test_client();
  let log = CallLog::default();
  let key = query_key!["todos"];

  let mut first = client.subscribe(key.clone(), echo_fetcher(&log, ms(10)));
  first.settled().await;
  sleep(ms(1)).await;

  let mut second = client.subscribe(key.clone(), echo_fetcher(&log, ms(10)));
  assert!(second.snapshot().is_fetching());
  second.settled().await;
  assert_eq!(log.count(&key), 2);
}

#[tokio::test(start_paused = true)]
async fn activation_refetch_can_be_disabled() {
  let client = test_builder().refetch_on_activate(false).build().unwrap();
  let log = CallLog::default();
  let key = query_key!["todos"];

  let mut first = client.subscribe(key.clone(), echo_fetcher(&log, ms(10)));
  first.settled().await;
  sleep(ms(1_000)).await;

  let second = client.subscribe(key.clone(), echo_fetcher(&log, ms(10)));
  assert!(second.snapshot().is_success());
  assert!(!second.snapshot().is_fetching());
  assert_eq!(log.count(&key), 1);
}

#[tokio::test(start_paused = true)]
async fn per_query_stale_time_overrides_the_default() {
  let client = test_client();
  let log = CallLog::default();
  let key = query_key!["settings"];
  let options = fibre_query::QueryOptions::new().stale_time(ms(60_000));

  let mut first = client.subscribe_with(key.clone(), echo_fetcher(&log, ms(10)), options);
  first.settled().await;
  sleep(ms(30_000)).await;

  let _second = client.subscribe_with(key.clone(), echo_fetcher(&log, ms(10)), options);
  assert_eq!(log.count(&key), 1);
}

#[tokio::test(start_paused = true)]
async fn refetch_replaces_the_data() {
  let client = test_builder().stale_time(ms(60_000)).build().unwrap();
  let log = CallLog::default();
  let key = query_key!["feed"];

  let mut observer = client.subscribe(key.clone(), echo_fetcher(&log, ms(10)));
  let before = observer.settled().await;
  sleep(ms(100)).await;

  assert!(observer.refetch());
  let after = observer.settled().await;
  assert_eq!(log.count(&key), 2);
  assert!(after.updated_at > before.updated_at);
  assert!(!after.is_invalidated);
}

#[tokio::test(start_paused = true)]
async fn cached_reads_do_not_fetch() {
  let client = test_builder().stale_time(ms(60_000)).build().unwrap();
  let log = CallLog::default();
  let key = query_key!["user", 9];

  assert!(client.get_query_data::<String>(&key).is_none());
  let mut observer = client.subscribe(key.clone(), echo_fetcher(&log, ms(10)));
  observer.settled().await;

  assert_eq!(client.get_query_data::<String>(&key).as_deref(), Some(&key.to_string()));
  let snapshot = client.get_query_snapshot::<String>(&key).unwrap();
  assert!(snapshot.is_success());
  assert_eq!(client.fetching_count(None), 0);
  assert_eq!(log.count(&key), 1);
}

#[tokio::test(start_paused = true)]
async fn reading_with_the_wrong_type_reports_a_mismatch() {
  let client = test_builder().stale_time(ms(60_000)).build().unwrap();
  let log = CallLog::default();
  let key = query_key!["user", 3];

  let mut observer = client.subscribe(key.clone(), echo_fetcher(&log, ms(10)));
  observer.settled().await;

  assert!(client.get_query_data::<u64>(&key).is_none());
  let snapshot = client.get_query_snapshot::<u64>(&key).unwrap();
  assert!(snapshot.is_error());
  assert!(matches!(
    snapshot.error,
    Some(fibre_query::QueryError::TypeMismatch { .. })
  ));
}

async fn sleep_until_offset(start: Instant, millis: u64) {
  tokio::time::sleep_until(start + ms(millis)).await;
}
