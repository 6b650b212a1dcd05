//! Tracing setup for the binary: a daily log file, optionally mirrored to stderr.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "devbytes.log";

/// Install the global subscriber. Keep the returned guard alive until exit,
/// or buffered log lines are lost.
pub fn init(config: &LoggingConfig) -> Result<WorkerGuard> {
  let directory = match &config.directory {
    Some(dir) => dir.clone(),
    None => default_log_dir()?,
  };
  std::fs::create_dir_all(&directory)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", directory.display(), e))?;

  let appender = tracing_appender::rolling::daily(&directory, LOG_FILE_PREFIX);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = build_filter(&config.level, std::env::var(EnvFilter::DEFAULT_ENV).ok())?;
  let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
  let stderr_layer = config
    .stderr
    .then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));

  tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}

/// `RUST_LOG` wins over the configured level when set.
fn build_filter(default_level: &str, env: Option<String>) -> Result<EnvFilter> {
  let directives = env
    .filter(|s| !s.trim().is_empty())
    .unwrap_or_else(|| default_level.to_string());

  EnvFilter::try_new(&directives).map_err(|e| eyre!("Invalid log filter '{}': {}", directives, e))
}

fn default_log_dir() -> Result<PathBuf> {
  let cache_dir = dirs::cache_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".cache")))
    .ok_or_else(|| eyre!("Could not determine cache directory"))?;

  Ok(cache_dir.join("devbytes").join("logs"))
}
