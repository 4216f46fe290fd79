//! Uncached list query driven by a dependency value.
//!
//! Inspired by TanStack Query's hooks, `ListQuery<D>` runs a fetch function
//! whenever its dependencies change and exposes `{ data, is_loading, error }`.
//! Responses are normalized to a list (see [`crate::normalize`]). Nothing is
//! cached and nothing is retried; for that, route the fetch through
//! [`crate::cache::QueryCache`].
//!
//! # Example
//!
//! ```ignore
//! let api = client.clone();
//! let mut query = ListQuery::new(move || {
//!     let api = api.clone();
//!     async move { api.get_json("/professionals", &params).await }
//! });
//!
//! // On every render / input change
//! query.set_deps((city.clone(), page));
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // When the view goes away
//! query.unmount();
//! ```

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::error::FetchError;
use crate::normalize::{normalize, NormalizedList};

/// State exposed to the consumer of a list query.
#[derive(Debug, Clone, Default)]
pub struct ListState {
  pub data: Vec<Value>,
  /// Envelope fields next to `data` (`total`, `page`, ...)
  pub meta: Map<String, Value>,
  pub is_loading: bool,
  pub error: Option<FetchError>,
  /// Last response had no recognizable list in it
  pub shape_mismatch: bool,
}

type FetcherFn = Box<dyn Fn() -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync>;

/// One run of the fetch function.
struct Invocation {
  cancelled: Arc<AtomicBool>,
  receiver: mpsc::UnboundedReceiver<Result<Value, FetchError>>,
}

impl Invocation {
  fn cancel(self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }
}

/// Dependency-driven list fetch with cancellation of superseded runs.
pub struct ListQuery<D> {
  state: ListState,
  fetcher: FetcherFn,
  deps: Option<D>,
  current: Option<Invocation>,
  fetched_at: Option<Instant>,
  unmounted: bool,
}

impl<D: PartialEq> ListQuery<D> {
  /// Create a query around `fetcher`. Nothing runs until `set_deps` or `refetch`.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
  {
    Self {
      state: ListState::default(),
      fetcher: Box::new(move || fetcher().boxed()),
      deps: None,
      current: None,
      fetched_at: None,
      unmounted: false,
    }
  }

  /// Record the current dependencies; runs the fetch if they changed.
  ///
  /// The first call always runs. Returns whether a fetch was started.
  pub fn set_deps(&mut self, deps: D) -> bool {
    if self.unmounted || self.deps.as_ref() == Some(&deps) {
      return false;
    }
    self.deps = Some(deps);
    self.start();
    true
  }

  /// Run the fetch again with the current dependencies.
  pub fn refetch(&mut self) {
    if !self.unmounted {
      self.start();
    }
  }

  /// Tear down: the in-flight result (if any) is discarded and no further
  /// fetches run.
  pub fn unmount(&mut self) {
    self.unmounted = true;
    if let Some(invocation) = self.current.take() {
      invocation.cancel();
    }
    self.state.is_loading = false;
  }

  pub fn is_unmounted(&self) -> bool {
    self.unmounted
  }

  pub fn state(&self) -> &ListState {
    &self.state
  }

  pub fn data(&self) -> &[Value] {
    &self.state.data
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading
  }

  pub fn error(&self) -> Option<&FetchError> {
    self.state.error.as_ref()
  }

  pub fn shape_mismatch(&self) -> bool {
    self.state.shape_mismatch
  }

  /// When the last successful response arrived.
  pub fn fetched_at(&self) -> Option<Instant> {
    self.fetched_at
  }

  /// Apply a settled result without blocking.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let invocation = match &mut self.current {
      Some(invocation) => invocation,
      None => return false,
    };

    match invocation.receiver.try_recv() {
      Ok(result) => {
        self.current = None;
        self.apply(result);
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.current = None;
        self.apply(Err(FetchError::msg("query was cancelled")));
        true
      }
    }
  }

  /// Wait for the current invocation to settle and apply its result.
  ///
  /// Returns `false` if nothing was in flight.
  pub async fn settle(&mut self) -> bool {
    let invocation = match &mut self.current {
      Some(invocation) => invocation,
      None => return false,
    };

    let result = invocation
      .receiver
      .recv()
      .await
      .unwrap_or_else(|| Err(FetchError::msg("query was cancelled")));
    self.current = None;
    self.apply(result);
    true
  }

  fn apply(&mut self, result: Result<Value, FetchError>) {
    self.state.is_loading = false;
    match result {
      Ok(value) => {
        let NormalizedList {
          items,
          meta,
          shape_mismatch,
        } = normalize(value);
        self.state.data = items;
        self.state.meta = meta;
        self.state.shape_mismatch = shape_mismatch;
        self.state.error = None;
        self.fetched_at = Some(Instant::now());
      }
      Err(error) => {
        tracing::debug!(error = %error, "list query failed");
        self.state.data = Vec::new();
        self.state.meta = Map::new();
        self.state.shape_mismatch = false;
        self.state.error = Some(error);
      }
    }
  }

  fn start(&mut self) {
    if let Some(previous) = self.current.take() {
      previous.cancel();
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let cancelled = Arc::new(AtomicBool::new(false));
    self.current = Some(Invocation {
      cancelled: Arc::clone(&cancelled),
      receiver: rx,
    });
    self.state.is_loading = true;

    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = future.await;
      if !cancelled.load(Ordering::SeqCst) {
        // Ignore send errors - receiver may have been dropped
        let _ = tx.send(result);
      }
    });
  }
}

impl<D> Drop for ListQuery<D> {
  fn drop(&mut self) {
    if let Some(invocation) = self.current.take() {
      invocation.cancel();
    }
  }
}

impl<D: std::fmt::Debug> std::fmt::Debug for ListQuery<D> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ListQuery")
      .field("state", &self.state)
      .field("deps", &self.deps)
      .field("fetched_at", &self.fetched_at)
      .field("unmounted", &self.unmounted)
      .finish_non_exhaustive()
  }
}
