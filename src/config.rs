use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub query: QueryConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Base URL of the marketplace API, e.g. "https://example.com/api"
  pub base_url: String,
  /// Upper bound for a single request
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:3000/api".to_string(),
      timeout_secs: 15,
    }
  }
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
  pub stale_time_secs: u64,
  pub gc_time_secs: u64,
  /// How often expired entries are swept; 0 disables the sweeper
  pub sweep_interval_secs: u64,
}

impl Default for QueryConfig {
  fn default() -> Self {
    Self {
      stale_time_secs: 30,
      gc_time_secs: 300,
      sweep_interval_secs: 60,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  /// Retries for read queries
  pub queries: u32,
  /// Retries for mutations
  pub mutations: u32,
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
  pub jitter_ratio: f64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    let defaults = RetryPolicy::queries();
    Self {
      queries: defaults.max_retries,
      mutations: RetryPolicy::mutations().max_retries,
      base_delay_ms: defaults.base_delay.as_millis() as u64,
      max_delay_ms: defaults.max_delay.as_millis() as u64,
      jitter_ratio: defaults.jitter_ratio,
    }
  }
}

impl RetryConfig {
  fn policy(&self, max_retries: u32) -> RetryPolicy {
    RetryPolicy::queries()
      .with_max_retries(max_retries)
      .with_delays(
        Duration::from_millis(self.base_delay_ms),
        Duration::from_millis(self.max_delay_ms),
      )
      .with_jitter(self.jitter_ratio)
  }

  pub fn query_policy(&self) -> RetryPolicy {
    self.policy(self.queries)
  }

  pub fn mutation_policy(&self) -> RetryPolicy {
    self.policy(self.mutations)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Filter used when RUST_LOG is not set
  pub level: String,
  /// Directory for log files (default: $XDG_DATA_HOME/marketfetch/logs)
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
    }
  }
}

impl LoggingConfig {
  pub fn directory(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.directory {
      return Ok(dir.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("marketfetch").join("logs"))
  }
}

impl Config {
  /// Resolve and load the configuration.
  ///
  /// An explicit path must exist. Otherwise the first of `./marketfetch.yaml`
  /// and `$XDG_CONFIG_HOME/marketfetch/config.yaml` is read. Every setting has
  /// a default pointing at a local API, so running with no file at all is
  /// valid and yields `Config::default()`.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = match explicit_path {
      Some(p) if !p.exists() => return Err(eyre!("Config file not found: {}", p.display())),
      Some(p) => Some(p.to_path_buf()),
      None => Self::candidate_paths().into_iter().find(|p| p.exists()),
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  /// Implicit config locations, most specific first.
  fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("marketfetch.yaml")];
    if let Some(config_dir) = dirs::config_dir() {
      paths.push(config_dir.join("marketfetch").join("config.yaml"));
    }
    paths
  }

  /// Parse `path` and reject values the client cannot run with.
  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    url::Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {:?}: {}", self.api.base_url, e))?;
    if self.api.timeout_secs == 0 {
      return Err(eyre!("api.timeout_secs must be greater than zero"));
    }
    if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
      return Err(eyre!("retry.jitter_ratio must be between 0 and 1"));
    }
    Ok(())
  }

  /// Cache defaults derived from the `query`, `retry` and `api` sections.
  pub fn cache_config(&self) -> CacheConfig {
    CacheConfig {
      stale_time: Duration::from_secs(self.query.stale_time_secs),
      gc_time: Duration::from_secs(self.query.gc_time_secs),
      request_timeout: self.api.timeout(),
      retry: self.retry.query_policy(),
    }
  }

  /// Get the API bearer token from the environment, if set.
  ///
  /// Checks MARKETFETCH_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("MARKETFETCH_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    let cache = config.cache_config();

    assert_eq!(cache.stale_time, Duration::from_secs(30));
    assert_eq!(cache.gc_time, Duration::from_secs(300));
    assert_eq!(cache.request_timeout, Duration::from_secs(15));
    assert_eq!(cache.retry, RetryPolicy::queries());
    assert_eq!(config.retry.mutation_policy(), RetryPolicy::mutations());
  }

  #[test]
  fn test_partial_yaml() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
      file,
      "api:\n  base_url: https://market.example/api\nquery:\n  stale_time_secs: 5\nretry:\n  queries: 1\n  base_delay_ms: 200"
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.api.base_url, "https://market.example/api");
    assert_eq!(config.api.timeout_secs, 15);
    assert_eq!(config.query.stale_time_secs, 5);
    assert_eq!(config.query.gc_time_secs, 300);

    let policy = config.retry.query_policy();
    assert_eq!(policy.max_retries, 1);
    assert_eq!(policy.base_delay, Duration::from_millis(200));
    assert_eq!(config.logging.level, "info");
  }

  #[test]
  fn test_missing_explicit_file() {
    let err = Config::load(Some(Path::new("/nonexistent/marketfetch.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_candidate_paths_start_local() {
    let paths = Config::candidate_paths();
    assert_eq!(paths[0], PathBuf::from("marketfetch.yaml"));
    assert!(paths
      .iter()
      .skip(1)
      .all(|p| p.ends_with("marketfetch/config.yaml")));
  }

  #[test]
  fn test_invalid_values_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "api:\n  base_url: not a url").unwrap();
    assert!(Config::load(Some(file.path())).is_err());

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "retry:\n  jitter_ratio: 3.0").unwrap();
    assert!(Config::load(Some(file.path())).is_err());
  }

  #[test]
  fn test_log_directory_override() {
    let config: Config = serde_yaml::from_str("logging:\n  directory: /tmp/mf-logs\n").unwrap();
    assert_eq!(
      config.logging.directory().unwrap(),
      PathBuf::from("/tmp/mf-logs")
    );
  }
}
