//! Retry policy: error classification and exponential backoff.
//!
//! The policy is plain configuration. Attempt counters live in the cache
//! entry that owns the fetch, so the same policy value can be shared freely.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::FetchError;

/// Coarse classification of a fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
  /// 4xx: permanent for the current input
  Client,
  /// 5xx: transient on the server side
  Server,
  /// No status at all (timeout, connection failure, fetch function error)
  Network,
}

impl ErrorClass {
  pub fn is_retryable(self) -> bool {
    !matches!(self, ErrorClass::Client)
  }
}

/// Classify an error by the HTTP status it carries.
pub fn classify(error: &FetchError) -> ErrorClass {
  match error.status() {
    Some(status) if (400..500).contains(&status) => ErrorClass::Client,
    Some(status) if status >= 500 => ErrorClass::Server,
    // 1xx-3xx reaching the error path means the server misbehaved
    Some(_) => ErrorClass::Server,
    None => ErrorClass::Network,
  }
}

/// Decides whether and when a failed request is tried again.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  /// Retries allowed after the first attempt
  pub max_retries: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
  /// Fraction of the exponential delay added as random jitter (0.0 - 1.0)
  pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::queries()
  }
}

impl RetryPolicy {
  /// Default policy for read queries: three retries.
  pub fn queries() -> Self {
    Self {
      max_retries: 3,
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(30),
      jitter_ratio: 0.25,
    }
  }

  /// Default policy for mutations: a single retry.
  pub fn mutations() -> Self {
    Self {
      max_retries: 1,
      ..Self::queries()
    }
  }

  /// Fail on the first error.
  pub fn none() -> Self {
    Self {
      max_retries: 0,
      ..Self::queries()
    }
  }

  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
    self.base_delay = base;
    self.max_delay = max;
    self
  }

  pub fn with_jitter(mut self, ratio: f64) -> Self {
    self.jitter_ratio = ratio.clamp(0.0, 1.0);
    self
  }

  /// Whether a request that failed with `error` after `attempt` retries
  /// (0 for the first failure) should be tried again.
  pub fn should_retry(&self, error: &FetchError, attempt: u32) -> bool {
    classify(error).is_retryable() && attempt < self.max_retries
  }

  /// Run `op` until it succeeds, fails with a non-retryable error, or the
  /// retries are used up. Sleeps `backoff_delay` between attempts.
  pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, FetchError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
  {
    let mut attempt = 0u32;
    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(err) if self.should_retry(&err, attempt) => {
          let delay = self.backoff_delay(attempt);
          attempt += 1;
          warn!(attempt, ?delay, error = %err, "request failed, retrying");
          tokio::time::sleep(delay).await;
        }
        Err(err) => return Err(err),
      }
    }
  }

  /// Delay before retry number `attempt`, with random jitter.
  pub fn backoff_delay(&self, attempt: u32) -> Duration {
    self.backoff_delay_with(attempt, rand::random::<f64>())
  }

  /// Delay before retry number `attempt` for a given jitter sample in `[0, 1)`.
  ///
  /// `min(base * 2^attempt, max)` plus up to `jitter_ratio` of that, capped at `max`.
  pub fn backoff_delay_with(&self, attempt: u32, sample: f64) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(31));
    let exp = self
      .base_delay
      .checked_mul(factor)
      .unwrap_or(self.max_delay)
      .min(self.max_delay);

    let jitter = exp.mul_f64(self.jitter_ratio.clamp(0.0, 1.0) * sample.clamp(0.0, 1.0));
    (exp + jitter).min(self.max_delay)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_classify() {
    assert_eq!(classify(&FetchError::http(404, "missing")), ErrorClass::Client);
    assert_eq!(classify(&FetchError::http(400, "bad")), ErrorClass::Client);
    assert_eq!(classify(&FetchError::http(499, "closed")), ErrorClass::Client);
    assert_eq!(classify(&FetchError::http(500, "boom")), ErrorClass::Server);
    assert_eq!(classify(&FetchError::http(503, "down")), ErrorClass::Server);
    assert_eq!(
      classify(&FetchError::Timeout(Duration::from_secs(15))),
      ErrorClass::Network
    );
    assert_eq!(classify(&FetchError::msg("x")), ErrorClass::Network);
  }

  #[test]
  fn test_client_errors_never_retried() {
    let policy = RetryPolicy::queries().with_max_retries(10);
    assert!(!policy.should_retry(&FetchError::http(404, "missing"), 0));
    assert!(!policy.should_retry(&FetchError::http(422, "invalid"), 0));
  }

  #[test]
  fn test_retry_ceiling() {
    let policy = RetryPolicy::queries();
    let err = FetchError::http(502, "bad gateway");
    assert!(policy.should_retry(&err, 0));
    assert!(policy.should_retry(&err, 2));
    assert!(!policy.should_retry(&err, 3));

    let mutations = RetryPolicy::mutations();
    assert!(mutations.should_retry(&err, 0));
    assert!(!mutations.should_retry(&err, 1));

    assert!(!RetryPolicy::none().should_retry(&err, 0));
  }

  #[test]
  fn test_backoff_grows_and_caps() {
    let policy = RetryPolicy::queries()
      .with_delays(Duration::from_millis(100), Duration::from_secs(1))
      .with_jitter(0.0);

    assert_eq!(policy.backoff_delay_with(0, 0.9), Duration::from_millis(100));
    assert_eq!(policy.backoff_delay_with(1, 0.9), Duration::from_millis(200));
    assert_eq!(policy.backoff_delay_with(3, 0.9), Duration::from_millis(800));
    assert_eq!(policy.backoff_delay_with(4, 0.9), Duration::from_secs(1));
    assert_eq!(policy.backoff_delay_with(40, 0.9), Duration::from_secs(1));
  }

  #[test]
  fn test_backoff_jitter_bounds() {
    let policy = RetryPolicy::queries()
      .with_delays(Duration::from_millis(100), Duration::from_secs(10))
      .with_jitter(0.5);

    assert_eq!(policy.backoff_delay_with(1, 0.0), Duration::from_millis(200));
    assert_eq!(policy.backoff_delay_with(1, 1.0), Duration::from_millis(300));

    for _ in 0..100 {
      let d = policy.backoff_delay(2);
      assert!(d >= Duration::from_millis(400));
      assert!(d <= Duration::from_millis(600));
    }
  }

  #[test]
  fn test_jitter_never_exceeds_cap() {
    let policy = RetryPolicy::queries()
      .with_delays(Duration::from_millis(100), Duration::from_millis(150))
      .with_jitter(1.0);
    assert_eq!(policy.backoff_delay_with(5, 0.99), Duration::from_millis(150));
  }

  #[tokio::test(start_paused = true)]
  async fn test_run_stops_at_ceiling() {
    let policy = RetryPolicy::mutations();
    let mut calls = 0;
    let result: Result<(), _> = policy
      .run(|| {
        calls += 1;
        async { Err(FetchError::http(500, "boom")) }
      })
      .await;

    assert_eq!(calls, 2);
    assert_eq!(result, Err(FetchError::http(500, "boom")));
  }

  #[tokio::test(start_paused = true)]
  async fn test_run_returns_client_error_at_once() {
    let policy = RetryPolicy::queries();
    let mut calls = 0;
    let result: Result<(), _> = policy
      .run(|| {
        calls += 1;
        async { Err(FetchError::http(409, "conflict")) }
      })
      .await;

    assert_eq!(calls, 1);
    assert!(result.is_err());
  }
}
