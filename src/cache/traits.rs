//! Result types handed out by the query cache.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::FetchError;

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Nothing fetched yet, or fetching is disabled
  Idle,
  /// First attempt in flight
  Fetching,
  /// A previous attempt failed with a retryable error; waiting or retrying
  Retrying { attempt: u32 },
  /// Last fetch succeeded
  Success,
  /// Last fetch failed for good; `data` may still hold an older value
  Error,
}

impl QueryStatus {
  pub fn is_in_flight(self) -> bool {
    matches!(self, QueryStatus::Fetching | QueryStatus::Retrying { .. })
  }
}

/// Where the data of a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
  /// No data available
  None,
  /// Fetched by this call (or by the in-flight fetch it joined)
  Network,
  /// Served from cache inside the stale window
  CacheFresh,
  /// Served from cache past the stale window, e.g. while revalidating
  CacheStale,
}

/// Snapshot of a cache entry returned to callers.
///
/// Errors are part of the value, never returned as `Err`.
#[derive(Debug)]
pub struct QueryResult<T> {
  pub data: Option<Arc<T>>,
  pub status: QueryStatus,
  pub error: Option<FetchError>,
  pub source: DataSource,
  /// Wall-clock time of the fetch that produced `data`
  pub updated_at: Option<DateTime<Utc>>,
  /// Failed attempts of the current (or last) fetch
  pub failure_count: u32,
}

impl<T> Clone for QueryResult<T> {
  fn clone(&self) -> Self {
    Self {
      data: self.data.clone(),
      status: self.status,
      error: self.error.clone(),
      source: self.source,
      updated_at: self.updated_at,
      failure_count: self.failure_count,
    }
  }
}

impl<T> QueryResult<T> {
  /// Result for a key that has never been fetched.
  pub fn idle() -> Self {
    Self {
      data: None,
      status: QueryStatus::Idle,
      error: None,
      source: DataSource::None,
      updated_at: None,
      failure_count: 0,
    }
  }

  /// Result built straight from a fetch outcome, without an entry behind it.
  pub fn from_network(data: Arc<T>) -> Self {
    Self {
      data: Some(data),
      status: QueryStatus::Success,
      error: None,
      source: DataSource::Network,
      updated_at: Some(Utc::now()),
      failure_count: 0,
    }
  }

  pub fn failed(error: FetchError) -> Self {
    Self {
      status: QueryStatus::Error,
      error: Some(error),
      ..Self::idle()
    }
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_deref()
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  /// Failed, but older data is still available to show.
  pub fn is_stale_while_error(&self) -> bool {
    self.is_error() && self.data.is_some()
  }
}
