//! An asynchronous query cache and synchronization engine.
//!
//! Data is fetched through caller-supplied fetchers, keyed by structured,
//! hierarchical [`QueryKey`]s, and shared by every [`Observer`] of that key.
//!
//! # Features
//! - **Single-flight**: concurrent subscriptions to one key share one fetch.
//! - **Stale-while-revalidate**: observers keep seeing the last data while a
//!   refetch is in flight; freshness is governed by a configurable stale time.
//! - **Retry with backoff**: failed attempts are retried with exponential,
//!   capped delays before a terminal error is surfaced.
//! - **Hierarchical invalidation**: invalidating `["users"]` also marks
//!   `["users", "detail", 7]` stale and refetches whatever is being observed.
//! - **Batches**: ordered groups of observers for "fetch N related items".
//! - **Mutations**: writes with `on_start`/`on_success`/`on_error`/`on_settled`
//!   hooks that invalidate their targets on success.
//!
//! # Example
//!
//! ```no_run
//! use fibre_query::{query_key, FetchError, QueryClient, QueryKey};
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let client = QueryClient::builder()
//!   .stale_time(Duration::from_secs(5))
//!   .build()?;
//!
//! let mut user = client.subscribe(query_key!["user", 1], |_key: QueryKey| async move {
//!   Ok::<_, FetchError>(String::from("Ada"))
//! });
//! let snapshot = user.settled().await;
//! assert_eq!(snapshot.data.as_deref().map(String::as_str), Some("Ada"));
//!
//! client.invalidate(&query_key!["user"]);
//! # Ok(())
//! # }
//! ```

// Public modules that form the API
pub mod batch;
pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod key;
pub mod metrics;
pub mod mutation;
pub mod observer;
pub mod runtime;
pub mod snapshot;

// Internal, crate-only modules
mod entry;
mod fetch;
mod invalidation;
mod shared;
mod store;
mod time;

// Re-export the primary user-facing types for convenience
pub use batch::QueryBatch;
pub use builder::QueryClientBuilder;
pub use client::QueryClient;
pub use config::QueryConfig;
pub use error::{BuildError, FetchError, MutationError, QueryError, SharedError};
pub use fetcher::{MutationFn, QueryFn};
pub use key::{canonicalize, is_prefix_of, KeySegment, QueryKey};
pub use metrics::MetricsSnapshot;
pub use mutation::{Mutation, MutationBuilder, MutationState};
pub use observer::{Observer, ObserverId, QueryOptions};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use snapshot::{FetchStatus, QuerySnapshot, QueryStatus};
pub use time::Instant;
