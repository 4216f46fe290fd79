//! Error type shared by the cache, the query hooks and the HTTP boundary.

use std::time::Duration;

/// Failure of a single fetch.
///
/// Errors are `Clone` because a deduplicated fetch hands the same outcome to
/// every caller that awaited it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
  /// The server answered with a non-success status
  #[error("HTTP {status}: {message}")]
  Http { status: u16, message: String },
  /// Connection could not be established or was dropped
  #[error("network error: {0}")]
  Network(String),
  /// The request did not settle in time
  #[error("request timed out after {0:?}")]
  Timeout(Duration),
  /// The body was not valid JSON
  #[error("failed to decode response: {0}")]
  Decode(String),
  /// Any other failure raised by a fetch function
  #[error("{0}")]
  Failed(String),
}

impl FetchError {
  /// Build an error from an HTTP status and message.
  pub fn http(status: u16, message: impl Into<String>) -> Self {
    Self::Http {
      status,
      message: message.into(),
    }
  }

  /// Build a generic failure from a message.
  pub fn msg(message: impl Into<String>) -> Self {
    Self::Failed(message.into())
  }

  /// HTTP status carried by this error, if any.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Http { status, .. } => Some(*status),
      _ => None,
    }
  }

  /// The original message, without the variant prefix added by `Display`.
  pub fn message(&self) -> String {
    match self {
      Self::Http { message, .. } => message.clone(),
      Self::Network(m) | Self::Decode(m) | Self::Failed(m) => m.clone(),
      Self::Timeout(d) => format!("timed out after {:?}", d),
    }
  }
}

impl From<serde_json::Error> for FetchError {
  fn from(e: serde_json::Error) -> Self {
    Self::Decode(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_message_strips_prefix() {
    assert_eq!(FetchError::msg("x").message(), "x");
    assert_eq!(FetchError::http(404, "not found").message(), "not found");
    assert_eq!(FetchError::http(404, "not found").to_string(), "HTTP 404: not found");
  }

  #[test]
  fn test_status_only_for_http() {
    assert_eq!(FetchError::http(503, "down").status(), Some(503));
    assert_eq!(FetchError::Network("reset".into()).status(), None);
    assert_eq!(FetchError::Timeout(Duration::from_secs(1)).status(), None);
  }
}
