use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use marketfetch::{CachedApiClient, Config, DataSource, QueryOptions, RequestKey, Rule, Validator};

#[derive(Parser, Debug)]
#[command(name = "marketfetch")]
#[command(about = "Cached, retrying client for the services marketplace API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/marketfetch/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch a list endpoint through the cache and print its items as JSON
  Get {
    /// Endpoint relative to the API base URL, e.g. /professionals
    endpoint: String,

    /// Query parameter as key=value (repeatable)
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Issue the same request N times; later calls are served from the cache
    #[arg(long, default_value_t = 1)]
    repeat: u32,
  },
  /// Check a form field value
  Validate {
    #[command(subcommand)]
    field: Field,
  },
}

#[derive(Subcommand, Debug)]
enum Field {
  Email { input: String },
  Phone { input: String },
  Password { input: String },
  /// Check that a confirmation matches the password
  Confirm { password: String, confirmation: String },
}

fn parse_param(s: &str) -> Result<(String, String), String> {
  let (key, value) = s
    .split_once('=')
    .ok_or_else(|| format!("expected key=value, got {:?}", s))?;
  if key.is_empty() {
    return Err(format!("empty parameter name in {:?}", s));
  }
  Ok((key.to_string(), value.to_string()))
}

fn init_logging(config: &Config) -> Result<WorkerGuard> {
  let directory = config.logging.directory()?;
  std::fs::create_dir_all(&directory)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", directory.display(), e))?;

  let file_appender = tracing_appender::rolling::daily(&directory, "marketfetch.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.logging.level))?;

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(file_writer).with_ansi(false))
    .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
    .try_init()?;

  Ok(guard)
}

async fn run_get(config: &Config, endpoint: &str, params: Vec<(String, String)>, repeat: u32) -> Result<()> {
  let client = CachedApiClient::new(config)?;
  if config.query.sweep_interval_secs > 0 {
    client
      .cache()
      .spawn_sweeper(Duration::from_secs(config.query.sweep_interval_secs));
  }

  let key = RequestKey::new(endpoint).with_params(params);
  let options = QueryOptions::default();

  for round in 1..=repeat.max(1) {
    let result = client.list(&key, &options).await;
    info!(round, source = ?result.source, items = result.list.len(), "list fetched");

    if let Some(err) = &result.error {
      if result.source == DataSource::None {
        return Err(eyre!("{} failed: {}", key.prefix(), err));
      }
      tracing::warn!(error = %err, "serving stale data after a failed refresh");
    }
    if result.list.shape_mismatch {
      tracing::warn!("response was neither an array nor a data envelope");
    }

    println!("{}", serde_json::to_string_pretty(&result.list.items)?);
  }
  Ok(())
}

fn run_validate(field: &Field) -> bool {
  let validator = Validator::new();
  match field {
    Field::Email { input } => validator.validate(Rule::Email, input),
    Field::Phone { input } => validator.validate(Rule::Phone, input),
    Field::Password { input } => validator.validate(Rule::Password, input),
    Field::Confirm {
      password,
      confirmation,
    } => validator.validate(Rule::Confirms(password), confirmation),
  }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
  color_eyre::install()?;

  let args = Args::parse();

  match args.command {
    Command::Validate { field } => {
      let valid = run_validate(&field);
      println!("{}", if valid { "valid" } else { "invalid" });
      Ok(if valid { ExitCode::SUCCESS } else { ExitCode::FAILURE })
    }
    Command::Get {
      endpoint,
      params,
      repeat,
    } => {
      let config = Config::load(args.config.as_deref())?;
      let _guard = init_logging(&config)?;

      run_get(&config, &endpoint, params, repeat).await?;
      Ok(ExitCode::SUCCESS)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_param() {
    assert_eq!(
      parse_param("city=rabat").unwrap(),
      ("city".to_string(), "rabat".to_string())
    );
    assert_eq!(parse_param("q=a=b").unwrap().1, "a=b");
    assert!(parse_param("city").is_err());
    assert!(parse_param("=x").is_err());
  }

  #[test]
  fn test_args_parse() {
    let args = Args::try_parse_from(["marketfetch", "get", "/reviews", "-p", "page=2", "--repeat", "3"]).unwrap();
    match args.command {
      Command::Get {
        endpoint,
        params,
        repeat,
      } => {
        assert_eq!(endpoint, "/reviews");
        assert_eq!(params, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(repeat, 3);
      }
      other => panic!("unexpected command {:?}", other),
    }
  }

  #[test]
  fn test_validate_confirm() {
    assert!(run_validate(&Field::Confirm {
      password: "secret123".into(),
      confirmation: "secret123".into(),
    }));
    assert!(!run_validate(&Field::Phone {
      input: "0512345678".into()
    }));
  }
}
