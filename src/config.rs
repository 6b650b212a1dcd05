use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::SqliteStore;
use crate::devbytes::PersistedVideo;

/// Environment variable overriding `remote.base_url`
pub const BASE_URL_ENV: &str = "DEVBYTES_BASE_URL";

/// Upper bounds for the remote settings
const MAX_TIMEOUT_SECS: u64 = 10 * 60;
const MAX_RETRIES: u32 = 10;
const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub remote: RemoteConfig,
  pub store: StoreConfig,
  pub refresh: RefreshConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
  /// Base URL of the playlist service; `devbytes.json` is resolved against it
  pub base_url: String,
  /// Per-request timeout
  pub timeout_secs: u64,
  /// Extra attempts after a connect error, timeout, or 5xx
  pub retries: u32,
  /// Delay before the first retry, grows linearly per attempt
  pub retry_backoff_ms: u64,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      base_url: "https://devbytes.udacity.com/".to_string(),
      timeout_secs: 30,
      retries: 2,
      retry_backoff_ms: 500,
    }
  }
}

impl RemoteConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn retry_backoff(&self) -> Duration {
    Duration::from_millis(self.retry_backoff_ms)
  }

  /// Reject settings that would make every request fail or stall retries.
  pub fn validate(&self) -> Result<()> {
    if !(1..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
      return Err(eyre!(
        "remote.timeout_secs must be between 1 and {}, got {}",
        MAX_TIMEOUT_SECS,
        self.timeout_secs
      ));
    }
    if self.retries > MAX_RETRIES {
      return Err(eyre!(
        "remote.retries must be at most {}, got {}",
        MAX_RETRIES,
        self.retries
      ));
    }
    if self.retry_backoff_ms > MAX_RETRY_BACKOFF_MS {
      return Err(eyre!(
        "remote.retry_backoff_ms must be at most {}, got {}",
        MAX_RETRY_BACKOFF_MS,
        self.retry_backoff_ms
      ));
    }
    self.endpoint().map(|_| ())
  }

  /// Full URL of the playlist document.
  pub fn endpoint(&self) -> Result<Url> {
    let mut base = Url::parse(self.base_url.trim())
      .map_err(|e| eyre!("Invalid remote.base_url '{}': {}", self.base_url, e))?;

    if base.cannot_be_a_base() {
      return Err(eyre!("remote.base_url '{}' cannot be a base URL", self.base_url));
    }

    // Without a trailing slash, join() would replace the last path segment
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    base
      .join("devbytes.json")
      .map_err(|e| eyre!("Failed to build playlist URL: {}", e))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Database file (defaults to $XDG_DATA_HOME/devbytes/cache.db)
  pub path: Option<PathBuf>,
  /// How often observers check the database for writes by other processes
  pub poll_interval_ms: u64,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      path: None,
      poll_interval_ms: 500,
    }
  }
}

impl StoreConfig {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
  /// Interval for `watch` mode
  pub interval_secs: u64,
}

impl Default for RefreshConfig {
  fn default() -> Self {
    // Once a day
    Self {
      interval_secs: 24 * 60 * 60,
    }
  }
}

impl RefreshConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter when RUST_LOG is not set
  pub level: String,
  /// Directory for log files (defaults to the platform cache directory)
  pub directory: Option<PathBuf>,
  /// Also log to stderr
  pub stderr: bool,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
      stderr: false,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./devbytes.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/devbytes/config.yaml
  ///
  /// Falls back to defaults when no file is found. `DEVBYTES_BASE_URL`
  /// overrides the configured base URL.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    config.with_base_url_override(std::env::var(BASE_URL_ENV).ok())
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("devbytes.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("devbytes").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Apply a base URL override and validate the remote settings.
  pub fn with_base_url_override(mut self, base_url: Option<String>) -> Result<Self> {
    if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
      self.remote.base_url = url;
    }
    self.remote.validate()?;
    Ok(self)
  }

  /// Resolve the database path, falling back to the platform data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.store.path {
      Some(path) => Ok(path.clone()),
      None => SqliteStore::<PersistedVideo>::default_path().map_err(|e| eyre!("{}", e)),
    }
  }
}
