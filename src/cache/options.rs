//! Cache-wide defaults and per-call query options.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Defaults shared by every query of a cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
  /// How long fetched data is served without a refetch
  pub stale_time: Duration,
  /// How long an unused entry is kept after its last fetch
  pub gc_time: Duration,
  /// Upper bound for a single attempt
  pub request_timeout: Duration,
  pub retry: RetryPolicy,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(30),
      gc_time: Duration::from_secs(5 * 60),
      request_timeout: Duration::from_secs(15),
      retry: RetryPolicy::queries(),
    }
  }
}

/// Options of one `get_or_fetch` call. `None` fields fall back to the cache defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
  /// When false, nothing is fetched and only cached data is returned
  pub enabled: bool,
  /// Serve stale data immediately and revalidate in the background
  pub background_refresh: bool,
  pub stale_time: Option<Duration>,
  pub gc_time: Option<Duration>,
  pub retry: Option<RetryPolicy>,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      enabled: true,
      background_refresh: false,
      stale_time: None,
      gc_time: None,
      retry: None,
    }
  }
}

impl QueryOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn background_refresh(mut self, on: bool) -> Self {
    self.background_refresh = on;
    self
  }

  pub fn stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = Some(stale_time);
    self
  }

  pub fn gc_time(mut self, gc_time: Duration) -> Self {
    self.gc_time = Some(gc_time);
    self
  }

  pub fn retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = Some(retry);
    self
  }

  pub(crate) fn resolve(&self, config: &CacheConfig) -> FetchSettings {
    FetchSettings {
      stale_time: self.stale_time.unwrap_or(config.stale_time),
      gc_time: self.gc_time.unwrap_or(config.gc_time),
      request_timeout: config.request_timeout,
      retry: self.retry.clone().unwrap_or_else(|| config.retry.clone()),
    }
  }
}

/// Options and defaults merged for one fetch.
#[derive(Debug, Clone)]
pub(crate) struct FetchSettings {
  pub stale_time: Duration,
  pub gc_time: Duration,
  pub request_timeout: Duration,
  pub retry: RetryPolicy,
}
