#![allow(dead_code)]

use fibre_query::{FetchError, KeySegment, QueryClient, QueryClientBuilder, QueryKey};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

pub type Fetch<T> = BoxFuture<'static, Result<T, FetchError>>;

pub fn ms(millis: u64) -> Duration {
  Duration::from_millis(millis)
}

// Enable with RUST_LOG=fibre_query=trace when a test needs debugging.
pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

// Short backoff so retry tests stay fast even on a real clock.
pub fn test_builder() -> QueryClientBuilder {
  init_tracing();
  QueryClient::builder()
    .backoff_base(ms(10))
    .backoff_cap(ms(100))
}

pub fn test_client() -> QueryClient {
  test_builder().build().unwrap()
}

/// Counts fetches per key identity.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<HashMap<String, usize>>>);

impl CallLog {
  pub fn record(&self, key: &QueryKey) {
    *self.0.lock().entry(key.identity().to_owned()).or_default() += 1;
  }

  pub fn count(&self, key: &QueryKey) -> usize {
    self.0.lock().get(key.identity()).copied().unwrap_or(0)
  }

  pub fn total(&self) -> usize {
    self.0.lock().values().sum()
  }
}

/// A fetcher that resolves to the key's identity after `delay`.
pub fn echo_fetcher(log: &CallLog, delay: Duration) -> impl Fn(QueryKey) -> Fetch<String> + Send + Sync + 'static {
  let log = log.clone();
  move |key: QueryKey| {
    log.record(&key);
    async move {
      sleep(delay).await;
      Ok(key.to_string())
    }
    .boxed()
  }
}

/// A fetcher that always fails after `delay`.
pub fn failing_fetcher(calls: &Arc<AtomicUsize>, delay: Duration) -> impl Fn(QueryKey) -> Fetch<String> + Send + Sync + 'static {
  let calls = Arc::clone(calls);
  move |_key: QueryKey| {
    calls.fetch_add(1, Ordering::SeqCst);
    async move {
      sleep(delay).await;
      Err(FetchError::transient("backend unavailable"))
    }
    .boxed()
  }
}

/// Reads the integer segment at `index`, e.g. the id in `["user", 7]`.
pub fn int_segment(key: &QueryKey, index: usize) -> i128 {
  match key.segments().get(index) {
    Some(KeySegment::Int(value)) => *value,
    other => panic!("expected an integer segment at {index} of {key}, got {other:?}"),
  }
}
