//! Cache entry and its state transitions.
//!
//! Every write to an entry goes through one of the transition methods here.
//! Fetches are numbered by start order; `data_seq` is the number of the fetch
//! that produced the current data, and only a fetch with a higher number may
//! replace it.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::traits::{DataSource, QueryResult, QueryStatus};
use crate::error::FetchError;

pub(crate) type SharedFetch<T> = Shared<BoxFuture<'static, QueryResult<T>>>;

/// Handle on the single fetch allowed to own an entry.
pub(crate) struct Inflight<T> {
  pub seq: u64,
  pub fetch: SharedFetch<T>,
}

pub(crate) struct CacheEntry<T> {
  pub key: String,
  pub data: Option<Arc<T>>,
  pub status: QueryStatus,
  pub error: Option<FetchError>,
  pub failure_count: u32,
  pub fetched_at: Option<Instant>,
  pub updated_at: Option<DateTime<Utc>>,
  pub stale_at: Option<Instant>,
  pub expire_at: Option<Instant>,
  /// Start number of the fetch that wrote `data`
  pub data_seq: u64,
  /// Fetches numbered at or below this started before the last invalidation
  pub invalidated_seq: u64,
  pub inflight: Option<Inflight<T>>,
}

impl<T> CacheEntry<T> {
  pub fn new(key: &str) -> Self {
    Self {
      key: key.to_string(),
      data: None,
      status: QueryStatus::Idle,
      error: None,
      failure_count: 0,
      fetched_at: None,
      updated_at: None,
      stale_at: None,
      expire_at: None,
      data_seq: 0,
      invalidated_seq: 0,
      inflight: None,
    }
  }

  /// Has data and is inside its stale window.
  pub fn is_fresh(&self, now: Instant) -> bool {
    self.data.is_some() && self.stale_at.is_some_and(|at| now < at)
  }

  /// Past its gc deadline and not being fetched.
  pub fn is_expired(&self, now: Instant) -> bool {
    self.inflight.is_none() && self.expire_at.is_some_and(|at| now >= at)
  }

  pub fn owns(&self, seq: u64) -> bool {
    self.inflight.as_ref().is_some_and(|f| f.seq == seq)
  }

  pub fn inflight_fetch(&self) -> Option<SharedFetch<T>> {
    self.inflight.as_ref().map(|f| f.fetch.clone())
  }

  /// idle/success/error -> fetching. Supersedes any fetch already in flight.
  pub fn begin(&mut self, seq: u64, fetch: SharedFetch<T>) {
    self.inflight = Some(Inflight { seq, fetch });
    self.status = QueryStatus::Fetching;
    self.failure_count = 0;
  }

  /// fetching/retrying -> retrying. Ignored for superseded fetches.
  pub fn retrying(&mut self, seq: u64, attempt: u32, error: &FetchError) {
    if !self.owns(seq) {
      return;
    }
    self.status = QueryStatus::Retrying { attempt };
    self.failure_count = attempt;
    self.error = Some(error.clone());
  }

  /// Apply a successful fetch. Returns false when the data was discarded
  /// because a later-started fetch already wrote.
  pub fn succeed(
    &mut self,
    seq: u64,
    data: Arc<T>,
    now: Instant,
    stale_time: Duration,
    gc_time: Duration,
  ) -> bool {
    let owner = self.owns(seq);
    if owner {
      self.inflight = None;
      self.failure_count = 0;
    }

    let written = seq > self.data_seq;
    if written {
      self.data = Some(data);
      self.data_seq = seq;
      self.fetched_at = Some(now);
      self.updated_at = Some(Utc::now());
      self.stale_at = Some(if seq <= self.invalidated_seq {
        now
      } else {
        now + stale_time
      });
      self.expire_at = Some(now + gc_time);
    }

    // A discarded owner still settles: the newer data came from a later write
    if owner || (written && self.inflight.is_none()) {
      self.status = QueryStatus::Success;
      self.error = None;
    }
    written
  }

  /// Apply a final failure. Keeps the last good data. Ignored for superseded fetches.
  pub fn fail(&mut self, seq: u64, error: FetchError, attempts: u32, now: Instant, gc_time: Duration) {
    if !self.owns(seq) {
      return;
    }
    self.inflight = None;
    self.status = QueryStatus::Error;
    self.error = Some(error);
    self.failure_count = attempts;
    let deadline = now + gc_time;
    self.expire_at = Some(self.expire_at.map_or(deadline, |at| at.max(deadline)));
  }

  /// Mark stale so the next read refetches. Fetches already running
  /// (`seq <= current_seq`) will land as stale too.
  pub fn invalidate(&mut self, now: Instant, current_seq: u64) {
    self.invalidated_seq = current_seq;
    if self.data.is_some() {
      self.stale_at = Some(now);
    }
  }

  pub fn snapshot(&self, source: DataSource) -> QueryResult<T> {
    QueryResult {
      data: self.data.clone(),
      status: self.status,
      error: self.error.clone(),
      source: if self.data.is_some() {
        source
      } else {
        DataSource::None
      },
      updated_at: self.updated_at,
      failure_count: self.failure_count,
    }
  }
}
