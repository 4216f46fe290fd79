use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use crate::config::{ApiConfig, Config};
use crate::error::FetchError;

/// Marketplace API client wrapper
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
  timeout: Duration,
}

impl ApiClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    Self::with_token(config, Config::get_api_token())
  }

  pub fn with_token(config: &ApiConfig, token: Option<String>) -> Result<Self> {
    let base_url = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", config.base_url, e))?;

    let http = reqwest::Client::builder()
      .timeout(config.timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      token,
      timeout: config.timeout(),
    })
  }

  /// Resolve `endpoint` against the base URL, keeping the base path.
  pub fn endpoint_url(&self, endpoint: &str, params: &BTreeMap<String, String>) -> Result<Url, FetchError> {
    let joined = format!(
      "{}/{}",
      self.base_url.as_str().trim_end_matches('/'),
      endpoint.trim_start_matches('/')
    );
    let mut url =
      Url::parse(&joined).map_err(|e| FetchError::msg(format!("invalid endpoint {}: {}", endpoint, e)))?;

    if !params.is_empty() {
      url.query_pairs_mut().extend_pairs(params.iter());
    }
    Ok(url)
  }

  /// GET a JSON document.
  pub async fn get_json(&self, endpoint: &str, params: &BTreeMap<String, String>) -> Result<Value, FetchError> {
    let url = self.endpoint_url(endpoint, params)?;
    self.execute(self.http.get(url)).await
  }

  /// Send a mutation (POST, PUT, PATCH, DELETE) with an optional JSON body.
  pub async fn send_json(&self, method: Method, endpoint: &str, body: Option<&Value>) -> Result<Value, FetchError> {
    let url = self.endpoint_url(endpoint, &BTreeMap::new())?;
    let mut request = self.http.request(method, url);
    if let Some(body) = body {
      request = request.json(body);
    }
    self.execute(request).await
  }

  async fn execute(&self, mut request: RequestBuilder) -> Result<Value, FetchError> {
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request
      .header(reqwest::header::ACCEPT, "application/json")
      .send()
      .await
      .map_err(|e| self.transport_error(e))?;

    let status = response.status();
    let body = response.text().await.map_err(|e| self.transport_error(e))?;

    if !status.is_success() {
      return Err(FetchError::http(status.as_u16(), error_message(status, &body)));
    }

    if body.trim().is_empty() {
      return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body)?)
  }

  fn transport_error(&self, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
      FetchError::Timeout(self.timeout)
    } else if e.is_decode() {
      FetchError::Decode(e.to_string())
    } else {
      FetchError::Network(e.to_string())
    }
  }
}

/// Pull a readable message out of an error body.
///
/// The backend answers `{ "message": ... }` or `{ "error": ... }`; anything
/// else falls back to the raw body or the status reason.
fn error_message(status: StatusCode, body: &str) -> String {
  if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(body) {
    for field in ["message", "error"] {
      if let Some(Value::String(msg)) = obj.get(field) {
        return msg.clone();
      }
    }
  }

  let body = body.trim();
  if !body.is_empty() {
    return body.to_string();
  }
  status
    .canonical_reason()
    .unwrap_or("request failed")
    .to_string()
}
