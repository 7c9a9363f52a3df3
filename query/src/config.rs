use std::time::Duration;

/// Process-wide engine settings, fixed at client construction.
///
/// With the `serde` feature enabled this can be loaded from any serde format.
/// Durations are written in human-readable form (`"5s"`, `"250ms"`) and every
/// missing field falls back to its default.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct QueryConfig {
  /// How long fetched data stays fresh.
  #[cfg_attr(feature = "serde", serde(deserialize_with = "de::duration"))]
  pub stale_time: Duration,
  /// Number of retries after the first failed attempt of a fetch cycle.
  pub retry_limit: u32,
  /// Delay before the first retry. Doubles on every further retry.
  #[cfg_attr(feature = "serde", serde(deserialize_with = "de::duration"))]
  pub backoff_base: Duration,
  /// Upper bound for any single retry delay.
  #[cfg_attr(feature = "serde", serde(deserialize_with = "de::duration"))]
  pub backoff_cap: Duration,
  /// Refetch stale data when a new observer subscribes.
  pub refetch_on_activate: bool,
  /// How long an entry without observers is kept before it may be dropped.
  #[cfg_attr(feature = "serde", serde(deserialize_with = "de::duration"))]
  pub entry_grace_period: Duration,
  /// Per-attempt deadline. A timed-out attempt is retried like any other failure.
  #[cfg_attr(feature = "serde", serde(deserialize_with = "de::optional_duration"))]
  pub fetch_timeout: Option<Duration>,
  /// Number of independently locked store partitions. Rounded up to a power of two.
  pub shards: usize,
}

impl Default for QueryConfig {
  fn default() -> Self {
    Self {
      stale_time: Duration::ZERO,
      retry_limit: 3,
      backoff_base: Duration::from_secs(1),
      backoff_cap: Duration::from_secs(30),
      refetch_on_activate: true,
      entry_grace_period: Duration::from_secs(5 * 60),
      fetch_timeout: None,
      shards: default_shards(),
    }
  }
}

pub(crate) fn default_shards() -> usize {
  (num_cpus::get() * 4).max(1).next_power_of_two()
}

#[cfg(feature = "serde")]
mod de {
  use serde::{Deserialize, Deserializer};
  use std::time::Duration;

  pub(super) fn duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
  where
    D: Deserializer<'de>,
  {
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
  }

  pub(super) fn optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
  where
    D: Deserializer<'de>,
  {
    match Option::<String>::deserialize(deserializer)? {
      Some(raw) => humantime::parse_duration(&raw)
        .map(Some)
        .map_err(serde::de::Error::custom),
      None => Ok(None),
    }
  }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
  use super::*;

  #[test]
  fn deserializes_human_readable_durations() {
    let config: QueryConfig = serde_json::from_str(
      r#"{ "stale_time": "5s", "retry_limit": 2, "backoff_base": "250ms", "fetch_timeout": "5s" }"#,
    )
    .unwrap();

    assert_eq!(config.stale_time, Duration::from_secs(5));
    assert_eq!(config.retry_limit, 2);
    assert_eq!(config.backoff_base, Duration::from_millis(250));
    assert_eq!(config.fetch_timeout, Some(Duration::from_secs(5)));
    assert_eq!(config.backoff_cap, QueryConfig::default().backoff_cap);
  }

  #[test]
  fn rejects_malformed_durations() {
    let result: Result<QueryConfig, _> = serde_json::from_str(r#"{ "stale_time": "soon" }"#);
    assert!(result.is_err());
  }
}
