use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::recovery::InvalidationScope;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub recovery: RecoveryConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
  /// Entries live for the session
  #[default]
  Memory,
  /// Entries persist in a SQLite file
  Sqlite,
  /// Caching disabled, every resolve goes to the network
  None,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub backend: CacheBackend,
  /// SQLite file (defaults to the data directory)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecoveryConfig {
  /// What a consumption-fault retry invalidates: all or query
  #[serde(default)]
  pub invalidation: InvalidationScope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  /// Simulated response delay for scripted payloads
  #[serde(default = "default_latency_ms")]
  pub latency_ms: u64,
  /// Payloads served in order by the scripted network
  #[serde(default = "default_responses")]
  pub responses: Vec<Value>,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      latency_ms: default_latency_ms(),
      responses: default_responses(),
    }
  }
}

impl NetworkConfig {
  pub fn latency(&self) -> Duration {
    Duration::from_millis(self.latency_ms)
  }
}

fn default_latency_ms() -> u64 {
  400
}

/// An account list with a missing node, then the same list loaded in full.
fn default_responses() -> Vec<Value> {
  vec![
    json!({ "viewer": { "accounts": { "edges": [
      { "node": { "uuid": "1" } },
      { "node": null }
    ] } } }),
    json!({ "viewer": { "accounts": { "edges": [
      { "node": { "uuid": "1" } },
      { "node": { "uuid": "2" } }
    ] } } }),
  ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Directory for log files (defaults to the data directory)
  pub directory: Option<PathBuf>,
  /// Filter used when REFETCH_LOG is not set
  #[serde(default = "default_log_filter")]
  pub filter: String,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      directory: None,
      filter: default_log_filter(),
    }
  }
}

fn default_log_filter() -> String {
  "info".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./refetch.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/refetch/config.yaml
  ///
  /// Falls back to defaults when no file is found.
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => {
        debug!("no config file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("refetch.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("refetch").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Log directory, falling back to `<data_dir>/refetch/logs`.
  pub fn log_directory(&self) -> Option<PathBuf> {
    self
      .log
      .directory
      .clone()
      .or_else(|| dirs::data_dir().map(|d| d.join("refetch").join("logs")))
  }
}
