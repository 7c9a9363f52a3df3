//! A small user directory backed by a simulated, occasionally failing API.
//!
//! Run with `RUST_LOG=fibre_query=debug cargo run --example user_directory`
//! to watch fetches, retries and invalidations.

use fibre_query::{query_key, FetchError, MutationError, QueryClient, QueryKey, QueryOptions};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct User {
  id: i128,
  name: String,
}

/// The "server": a table of users and a request counter.
#[derive(Default)]
struct Backend {
  users: RwLock<BTreeMap<i128, String>>,
  requests: AtomicUsize,
}

impl Backend {
  async fn list(&self) -> Result<Vec<User>, FetchError> {
    let request = self.requests.fetch_add(1, Ordering::SeqCst);
    sleep(Duration::from_millis(80)).await;
    // Every fourth request fails to show retries.
    if request % 4 == 3 {
      return Err(FetchError::transient("503 service unavailable"));
    }
    Ok(
      self
        .users
        .read()
        .iter()
        .map(|(id, name)| User { id: *id, name: name.clone() })
        .collect(),
    )
  }

  async fn get(&self, id: i128) -> Result<User, FetchError> {
    self.requests.fetch_add(1, Ordering::SeqCst);
    sleep(Duration::from_millis(40)).await;
    let name = self.users.read().get(&id).cloned();
    name
      .map(|name| User { id, name })
      .ok_or_else(|| FetchError::transient(format!("404 user {id} not found")))
  }

  async fn rename(&self, id: i128, name: String) -> Result<User, MutationError> {
    sleep(Duration::from_millis(60)).await;
    let mut users = self.users.write();
    let slot = users
      .get_mut(&id)
      .ok_or_else(|| MutationError::rejected(format!("404 user {id} not found")))?;
    *slot = name.clone();
    Ok(User { id, name })
  }
}

fn user_id(key: &QueryKey) -> i128 {
  match key.segments().get(1) {
    Some(fibre_query::KeySegment::Int(id)) => *id,
    _ => -1,
  }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let backend = Arc::new(Backend::default());
  backend.users.write().extend([
    (1, String::from("Ada")),
    (2, String::from("Grace")),
    (3, String::from("Linus")),
  ]);

  let client = QueryClient::builder()
    .stale_time(Duration::from_secs(5))
    .backoff_base(Duration::from_millis(100))
    .backoff_cap(Duration::from_secs(2))
    .build()?;

  let list_fetcher = {
    let backend = backend.clone();
    move |_key: QueryKey| {
      let backend = backend.clone();
      async move { backend.list().await }
    }
  };
  let detail_fetcher = {
    let backend = backend.clone();
    move |key: QueryKey| {
      let backend = backend.clone();
      async move { backend.get(user_id(&key)).await }
    }
  };

  let mut list = client.subscribe(query_key!["users"], list_fetcher);
  let users = list.settled().await;
  println!("directory: {:?}", users.data.as_deref().unwrap_or(&Vec::new()));

  // One batch for the detail pages, including an id that does not exist.
  let mut details = client.batch_with(
    detail_fetcher,
    QueryOptions::new().stale_time(Duration::from_secs(30)),
  );
  details.set_keys([1, 2, 9].map(|id| query_key!["user", id]));
  let keys = details.keys().to_vec();
  let snapshots = details.settled().await;
  for (key, snapshot) in keys.iter().zip(snapshots) {
    match (&snapshot.data, &snapshot.error) {
      (Some(user), _) => println!("{key}: {}", user.name),
      (None, Some(error)) => println!("{key}: {error}"),
      (None, None) => println!("{key}: no data"),
    }
  }

  let rename = client
    .mutation({
      let backend = backend.clone();
      move |(id, name): (i128, String)| {
        let backend = backend.clone();
        async move { backend.rename(id, name).await }
      }
    })
    .on_success(|_, user: &User| println!("renamed user {} to {}", user.id, user.name))
    .on_error(|(id, _), error| println!("could not rename user {id}: {error}"))
    .invalidates(|(id, _), _| vec![query_key!["users"], query_key!["user", *id]])
    .build();

  rename.run((2, String::from("Grace Hopper"))).await?;
  let users = list.settled().await;
  println!("directory after rename: {:?}", users.data.as_deref().unwrap_or(&Vec::new()));

  if rename.run((7, String::from("Nobody"))).await.is_err() {
    println!("rename of a missing user failed as expected");
  }

  println!("requests sent: {}", backend.requests.load(Ordering::SeqCst));
  println!("{:#?}", client.metrics());
  client.shutdown().await;
  Ok(())
}
