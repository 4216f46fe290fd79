//! Deterministic cache keys for API requests.

use std::collections::BTreeMap;

/// Anything that can name a cached query.
pub trait QueryKey {
  /// Stable string used as the cache key; equal requests give equal keys.
  fn cache_key(&self) -> String;

  /// Human-readable description for logs.
  fn description(&self) -> String;
}

/// A GET request: endpoint plus query parameters.
///
/// Parameters are kept sorted, so insertion order never changes the key.
/// Keys render as `GET /professionals?city=rabat&page=2`, which makes
/// `"GET /professionals"` a prefix of every page and filter of that list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  endpoint: String,
  params: BTreeMap<String, String>,
}

impl RequestKey {
  pub fn new(endpoint: &str) -> Self {
    Self {
      endpoint: normalize_endpoint(endpoint),
      params: BTreeMap::new(),
    }
  }

  pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
    self.params.insert(name.into(), value.to_string());
    self
  }

  pub fn with_params<I, K, V>(mut self, params: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: ToString,
  {
    for (k, v) in params {
      self.params.insert(k.into(), v.to_string());
    }
    self
  }

  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }

  pub fn params(&self) -> &BTreeMap<String, String> {
    &self.params
  }

  /// Key prefix shared by every request to this endpoint.
  pub fn prefix(&self) -> String {
    format!("GET {}", self.endpoint)
  }
}

impl QueryKey for RequestKey {
  fn cache_key(&self) -> String {
    if self.params.is_empty() {
      return self.prefix();
    }
    let query = url::form_urlencoded::Serializer::new(String::new())
      .extend_pairs(self.params.iter())
      .finish();
    format!("{}?{}", self.prefix(), query)
  }

  fn description(&self) -> String {
    if self.params.is_empty() {
      self.endpoint.clone()
    } else {
      let filters: Vec<String> = self
        .params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
      format!("{} ({})", self.endpoint, filters.join(", "))
    }
  }
}

/// Leading slash, no trailing slash, no surrounding whitespace.
fn normalize_endpoint(endpoint: &str) -> String {
  let trimmed = endpoint.trim().trim_matches('/');
  format!("/{}", trimmed)
}
