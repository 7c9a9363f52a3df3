use std::time::Duration;

pub use tokio::time::Instant;

// All timestamps go through the runtime clock so a paused test runtime
// controls staleness, backoff and grace periods together.
#[inline]
pub(crate) fn now() -> Instant {
  Instant::now()
}

/// Returns `true` if more than `window` has passed between `since` and `now`.
#[inline]
pub(crate) fn elapsed_beyond(since: Instant, now: Instant, window: Duration) -> bool {
  now.saturating_duration_since(since) > window
}
