//! Query cache that orchestrates staleness, request coalescing and retries.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::entry::{CacheEntry, SharedFetch};
use super::options::{CacheConfig, FetchSettings, QueryOptions};
use super::traits::{DataSource, QueryResult};
use crate::error::FetchError;
use crate::retry::{classify, ErrorClass};

type FetchFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync>;

struct Inner<T> {
  entries: Mutex<HashMap<String, CacheEntry<T>>>,
  config: Mutex<CacheConfig>,
  /// Start number of the most recent fetch or manual write, across all keys
  seq: AtomicU64,
}

impl<T> Inner<T> {
  fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn config(&self) -> MutexGuard<'_, CacheConfig> {
    self.config.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn next_seq(&self) -> u64 {
    self.seq.fetch_add(1, Ordering::SeqCst) + 1
  }

  fn current_seq(&self) -> u64 {
    self.seq.load(Ordering::SeqCst)
  }

  fn mark_retrying(&self, key: &str, seq: u64, attempt: u32, error: &FetchError) {
    if let Some(entry) = self.entries().get_mut(key) {
      entry.retrying(seq, attempt, error);
    }
  }

  fn settle_success(&self, key: &str, seq: u64, data: T, settings: &FetchSettings) -> QueryResult<T> {
    let data = Arc::new(data);
    let mut entries = self.entries();
    match entries.get_mut(key) {
      Some(entry) => {
        let written = entry.succeed(
          seq,
          data,
          Instant::now(),
          settings.stale_time,
          settings.gc_time,
        );
        if !written {
          debug!(key, seq, "discarding result of superseded fetch");
        }
        entry.snapshot(DataSource::Network)
      }
      // Removed while fetching
      None => QueryResult::from_network(data),
    }
  }

  fn settle_error(
    &self,
    key: &str,
    seq: u64,
    error: FetchError,
    attempts: u32,
    settings: &FetchSettings,
  ) -> QueryResult<T> {
    match classify(&error) {
      ErrorClass::Client => debug!(key, error = %error, "client error, not retrying"),
      class => error!(key, ?class, attempts, error = %error, "fetch failed after retries"),
    }

    let mut entries = self.entries();
    match entries.get_mut(key) {
      Some(entry) => {
        entry.fail(seq, error, attempts, Instant::now(), settings.gc_time);
        entry.snapshot(DataSource::CacheStale)
      }
      None => QueryResult::failed(error),
    }
  }

  fn sweep(&self) -> usize {
    let now = Instant::now();
    let mut entries = self.entries();
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before - entries.len()
  }
}

/// In-memory query cache keyed by request key.
///
/// Cloning is cheap and every clone shares the same store. Create one per
/// application (or per test) and hand it to the code that fetches.
pub struct QueryCache<T> {
  inner: Arc<Inner<T>>,
}

impl<T> Clone for QueryCache<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Send + Sync + 'static> Default for QueryCache<T> {
  fn default() -> Self {
    Self::new(CacheConfig::default())
  }
}

impl<T: Send + Sync + 'static> QueryCache<T> {
  pub fn new(config: CacheConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        entries: Mutex::new(HashMap::new()),
        config: Mutex::new(config),
        seq: AtomicU64::new(0),
      }),
    }
  }

  pub fn set_stale_time(&self, stale_time: Duration) {
    self.inner.config().stale_time = stale_time;
  }

  pub fn set_gc_time(&self, gc_time: Duration) {
    self.inner.config().gc_time = gc_time;
  }

  pub fn config(&self) -> CacheConfig {
    self.inner.config().clone()
  }

  /// Return cached data for `key`, fetching it when absent or stale.
  ///
  /// 1. Disabled queries never fetch; they return whatever is cached
  /// 2. Fresh entries are returned without calling `fetcher`
  /// 3. If a fetch for `key` is already running, join it
  /// 4. Otherwise start one; with `background_refresh` and stale data present,
  ///    return the stale data right away
  ///
  /// The fetch runs on its own task, so dropping the returned future does not
  /// cancel it for other callers.
  pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetcher: F, options: &QueryOptions) -> QueryResult<T>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let pending = {
      let mut entries = self.inner.entries();
      let now = Instant::now();
      evict_if_expired(&mut entries, key, now);

      if !options.enabled {
        return entries
          .get(key)
          .map(|e| e.snapshot(source_at(e, now)))
          .unwrap_or_else(QueryResult::idle);
      }

      let lookup = match entries.get(key) {
        Some(entry) if entry.is_fresh(now) => Lookup::Fresh(entry.snapshot(DataSource::CacheFresh)),
        Some(entry) if entry.inflight.is_some() => {
          Lookup::Join(entry.inflight_fetch(), entry.data.is_some())
        }
        Some(entry) => Lookup::Miss(entry.data.is_some()),
        None => Lookup::Miss(false),
      };

      let (pending, has_data) = match lookup {
        Lookup::Fresh(result) => {
          debug!(key, "cache hit");
          return result;
        }
        Lookup::Join(fetch, has_data) => {
          debug!(key, "joining in-flight fetch");
          (fetch, has_data)
        }
        Lookup::Miss(has_data) => {
          debug!(key, stale = has_data, "cache miss, fetching");
          let settings = options.resolve(&self.inner.config());
          (
            Some(self.start(&mut entries, key, boxed(fetcher), settings)),
            has_data,
          )
        }
      };

      if options.background_refresh && has_data {
        if let Some(entry) = entries.get(key) {
          return entry.snapshot(DataSource::CacheStale);
        }
      }
      pending
    };

    match pending {
      Some(fetch) => fetch.await,
      None => QueryResult::idle(),
    }
  }

  /// Start a new fetch for `key` even if one is running or the data is fresh.
  ///
  /// The running fetch is superseded: it completes, but can no longer replace
  /// the data written by this one.
  pub async fn refetch<F, Fut>(&self, key: &str, fetcher: F, options: &QueryOptions) -> QueryResult<T>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    if !options.enabled {
      return self.peek(key);
    }

    let fetch = {
      let mut entries = self.inner.entries();
      let settings = options.resolve(&self.inner.config());
      self.start(&mut entries, key, boxed(fetcher), settings)
    };
    fetch.await
  }

  /// Snapshot of `key` without fetching.
  pub fn peek(&self, key: &str) -> QueryResult<T> {
    let mut entries = self.inner.entries();
    let now = Instant::now();
    evict_if_expired(&mut entries, key, now);
    entries
      .get(key)
      .map(|e| e.snapshot(source_at(e, now)))
      .unwrap_or_else(QueryResult::idle)
  }

  /// Write data for `key` as if a fetch had just returned it.
  ///
  /// Counts as the most recently started fetch, so a request already in
  /// flight for `key` will not overwrite it.
  pub fn set_query_data(&self, key: &str, data: T) {
    let settings = QueryOptions::default().resolve(&self.inner.config());
    let seq = self.inner.next_seq();
    let mut entries = self.inner.entries();
    let entry = entries
      .entry(key.to_string())
      .or_insert_with(|| CacheEntry::new(key));
    entry.succeed(
      seq,
      Arc::new(data),
      Instant::now(),
      settings.stale_time,
      settings.gc_time,
    );
  }

  /// Mark every entry whose key starts with `prefix` as stale.
  ///
  /// Data stays available; the next read refetches. Returns the number of
  /// entries touched.
  pub fn invalidate(&self, prefix: &str) -> usize {
    let now = Instant::now();
    let current = self.inner.current_seq();
    let mut entries = self.inner.entries();
    let mut count = 0;
    for entry in entries.values_mut().filter(|e| e.key.starts_with(prefix)) {
      entry.invalidate(now, current);
      count += 1;
    }
    debug!(prefix, count, "invalidated");
    count
  }

  /// Drop every entry whose key starts with `prefix`.
  pub fn remove(&self, prefix: &str) -> usize {
    let mut entries = self.inner.entries();
    let before = entries.len();
    entries.retain(|key, _| !key.starts_with(prefix));
    before - entries.len()
  }

  pub fn clear(&self) {
    self.inner.entries().clear();
  }

  /// Remove entries past their gc deadline. Returns how many were removed.
  pub fn sweep(&self) -> usize {
    self.inner.sweep()
  }

  /// Run `sweep` every `interval` until the cache is dropped.
  pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
    let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.tick().await;
      loop {
        ticker.tick().await;
        match weak.upgrade() {
          Some(inner) => {
            let removed = inner.sweep();
            if removed > 0 {
              debug!(removed, "swept expired cache entries");
            }
          }
          None => break,
        }
      }
    })
  }

  pub fn len(&self) -> usize {
    self.inner.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Spawn a fetch for `key` and register it as the entry's in-flight fetch.
  ///
  /// Must be called with the entries lock held, so the spawned task cannot
  /// settle before it is registered.
  fn start(
    &self,
    entries: &mut HashMap<String, CacheEntry<T>>,
    key: &str,
    fetcher: FetchFn<T>,
    settings: FetchSettings,
  ) -> SharedFetch<T> {
    let seq = self.inner.next_seq();
    let inner = Arc::clone(&self.inner);
    let task_key = key.to_string();
    let handle = tokio::spawn(async move {
      // The attempt loop runs on its own task so a panicking fetcher still
      // settles the entry here and frees the in-flight slot.
      let attempts = tokio::spawn(run_fetch(
        Arc::clone(&inner),
        task_key.clone(),
        seq,
        fetcher,
        settings.clone(),
      ));
      match attempts.await {
        Ok(result) => result,
        Err(e) => inner.settle_error(
          &task_key,
          seq,
          FetchError::msg(format!("fetch task failed: {}", e)),
          0,
          &settings,
        ),
      }
    });

    let fetch: SharedFetch<T> = async move {
      match handle.await {
        Ok(result) => result,
        Err(e) => QueryResult::failed(FetchError::msg(format!("fetch task failed: {}", e))),
      }
    }
    .boxed()
    .shared();

    entries
      .entry(key.to_string())
      .or_insert_with(|| CacheEntry::new(key))
      .begin(seq, fetch.clone());
    fetch
  }
}

enum Lookup<T> {
  Fresh(QueryResult<T>),
  Join(Option<SharedFetch<T>>, bool),
  Miss(bool),
}

/// Attempt loop of one fetch: timeout per attempt, backoff between retries.
async fn run_fetch<T>(
  inner: Arc<Inner<T>>,
  key: String,
  seq: u64,
  fetcher: FetchFn<T>,
  settings: FetchSettings,
) -> QueryResult<T> {
  let mut attempt = 0u32;
  loop {
    let outcome = match tokio::time::timeout(settings.request_timeout, fetcher()).await {
      Ok(outcome) => outcome,
      Err(_) => Err(FetchError::Timeout(settings.request_timeout)),
    };

    match outcome {
      Ok(data) => return inner.settle_success(&key, seq, data, &settings),
      Err(err) if settings.retry.should_retry(&err, attempt) => {
        let delay = settings.retry.backoff_delay(attempt);
        attempt += 1;
        warn!(key = %key, attempt, ?delay, error = %err, "fetch failed, retrying");
        inner.mark_retrying(&key, seq, attempt, &err);
        tokio::time::sleep(delay).await;
      }
      Err(err) => return inner.settle_error(&key, seq, err, attempt, &settings),
    }
  }
}

fn boxed<T, F, Fut>(fetcher: F) -> FetchFn<T>
where
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
  Arc::new(move || fetcher().boxed())
}

fn evict_if_expired<T>(entries: &mut HashMap<String, CacheEntry<T>>, key: &str, now: Instant) {
  if entries.get(key).is_some_and(|e| e.is_expired(now)) {
    debug!(key, "evicting expired entry");
    entries.remove(key);
  }
}

fn source_at<T>(entry: &CacheEntry<T>, now: Instant) -> DataSource {
  if entry.is_fresh(now) {
    DataSource::CacheFresh
  } else {
    DataSource::CacheStale
  }
}
