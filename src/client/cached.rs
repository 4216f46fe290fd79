//! Cached API client that routes reads through the query cache.

use color_eyre::Result;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::cache::{DataSource, QueryCache, QueryOptions, QueryResult, QueryStatus};
use crate::config::Config;
use crate::error::FetchError;
use crate::normalize::{normalize, NormalizedList};
use crate::retry::RetryPolicy;

use super::http::ApiClient;
use super::key::{QueryKey, RequestKey};

/// A cached list read, normalized to items.
#[derive(Debug, Clone)]
pub struct ListResult {
  pub list: NormalizedList,
  pub status: QueryStatus,
  pub error: Option<FetchError>,
  pub source: DataSource,
}

impl From<QueryResult<Value>> for ListResult {
  fn from(result: QueryResult<Value>) -> Self {
    let list = result
      .data()
      .map(|value| normalize(value.clone()))
      .unwrap_or_default();
    Self {
      list,
      status: result.status,
      error: result.error,
      source: result.source,
    }
  }
}

/// API client with transparent caching.
///
/// GETs are served from the shared [`QueryCache`]; mutations go straight to
/// the API and invalidate the cached reads they affect.
#[derive(Clone)]
pub struct CachedApiClient {
  inner: ApiClient,
  cache: QueryCache<Value>,
  mutation_retry: RetryPolicy,
}

impl CachedApiClient {
  /// Create a cached client from configuration.
  pub fn new(config: &Config) -> Result<Self> {
    let inner = ApiClient::new(&config.api)?;
    let cache = QueryCache::new(config.cache_config());

    Ok(Self::with_cache(inner, cache, config.retry.mutation_policy()))
  }

  pub fn with_cache(inner: ApiClient, cache: QueryCache<Value>, mutation_retry: RetryPolicy) -> Self {
    Self {
      inner,
      cache,
      mutation_retry,
    }
  }

  pub fn cache(&self) -> &QueryCache<Value> {
    &self.cache
  }

  /// GET a JSON document through the cache.
  pub async fn fetch(&self, key: &RequestKey, options: &QueryOptions) -> QueryResult<Value> {
    debug!(query = %key.description(), "fetch");

    let inner = self.inner.clone();
    let endpoint = key.endpoint().to_string();
    let params = key.params().clone();

    self
      .cache
      .get_or_fetch(
        &key.cache_key(),
        move || {
          let inner = inner.clone();
          let endpoint = endpoint.clone();
          let params = params.clone();
          async move { inner.get_json(&endpoint, &params).await }
        },
        options,
      )
      .await
  }

  /// GET a list through the cache, accepting both bare arrays and envelopes.
  pub async fn list(&self, key: &RequestKey, options: &QueryOptions) -> ListResult {
    self.fetch(key, options).await.into()
  }

  /// Send a mutation, then mark cached reads under each of `invalidates`
  /// (endpoints such as "/bookings") as stale.
  ///
  /// Nothing is invalidated when the mutation fails.
  pub async fn mutate(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<&Value>,
    invalidates: &[&str],
  ) -> Result<Value, FetchError> {
    let response = self
      .mutation_retry
      .run(|| self.inner.send_json(method.clone(), endpoint, body))
      .await?;

    for target in invalidates {
      let prefix = RequestKey::new(target).prefix();
      self.cache.invalidate(&prefix);
    }
    Ok(response)
  }
}
