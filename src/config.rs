use color_eyre::{
  eyre::{eyre, WrapErr},
  Result,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::db;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// The application's own origin, e.g. `https://app.example`
  pub origin: Url,
  /// Deployment version, encoded as a suffix in every store name
  #[serde(default = "default_version")]
  pub version: String,
  /// Path prefix of the API namespace
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  /// Third-party origins that are intercepted like our own static assets
  #[serde(default = "default_allowed_origins")]
  pub allowed_origins: Vec<String>,
  #[serde(default)]
  pub stores: StoresConfig,
  /// Critical paths fetched into the static store at install
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  /// App shell served to navigations when offline
  #[serde(default = "default_shell_path")]
  pub shell_path: String,
  #[serde(default = "default_api_ttl_secs")]
  pub api_ttl_secs: u64,
  #[serde(default = "default_network_timeout_secs")]
  pub network_timeout_secs: u64,
  /// Request headers folded into the cache fingerprint (case-insensitive)
  #[serde(default)]
  pub vary_headers: Vec<String>,
  /// Total body bytes allowed across all cache stores
  pub quota_bytes: Option<u64>,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
  /// Explicit database path (defaults to the user data directory)
  pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoresConfig {
  #[serde(default = "default_static_prefix")]
  pub static_prefix: String,
  #[serde(default = "default_runtime_prefix")]
  pub runtime_prefix: String,
}

impl Default for StoresConfig {
  fn default() -> Self {
    Self {
      static_prefix: default_static_prefix(),
      runtime_prefix: default_runtime_prefix(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
  /// Park an item once it has failed this many replays (unbounded if unset)
  pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
  #[serde(default = "default_shell_path")]
  pub probe_path: String,
  #[serde(default = "default_probe_interval_secs")]
  pub interval_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_path: default_shell_path(),
      interval_secs: default_probe_interval_secs(),
    }
  }
}

fn default_version() -> String {
  "v1".to_string()
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

fn default_allowed_origins() -> Vec<String> {
  vec![
    "https://fonts.googleapis.com".to_string(),
    "https://fonts.gstatic.com".to_string(),
  ]
}

fn default_static_prefix() -> String {
  "static-assets".to_string()
}

fn default_runtime_prefix() -> String {
  "runtime-cache".to_string()
}

fn default_precache() -> Vec<String> {
  ["/", "/create", "/templates", "/game", "/manifest.json"]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

fn default_shell_path() -> String {
  "/".to_string()
}

fn default_api_ttl_secs() -> u64 {
  3600
}

fn default_network_timeout_secs() -> u64 {
  10
}

fn default_probe_interval_secs() -> u64 {
  15
}

impl Config {
  /// Configuration with every optional field at its default.
  pub fn for_origin(origin: Url) -> Self {
    Self {
      origin,
      version: default_version(),
      api_prefix: default_api_prefix(),
      allowed_origins: default_allowed_origins(),
      stores: StoresConfig::default(),
      precache: default_precache(),
      shell_path: default_shell_path(),
      api_ttl_secs: default_api_ttl_secs(),
      network_timeout_secs: default_network_timeout_secs(),
      vary_headers: Vec::new(),
      quota_bytes: None,
      sync: SyncConfig::default(),
      connectivity: ConnectivityConfig::default(),
      database: None,
    }
  }

  /// Load configuration from the first config file that exists.
  ///
  /// An explicit path must exist. Otherwise `./offcache.yaml` is tried, then
  /// `config.yaml` in the per-user config directory (see [`db::config_dir`]).
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = match explicit_path {
      Some(p) if p.exists() => p.to_path_buf(),
      Some(p) => return Err(eyre!("Config file not found: {}", p.display())),
      None => search_paths().into_iter().find(|p| p.exists()).ok_or_else(|| {
        eyre!("No configuration file found. Create offcache.yaml with at least an `origin:` entry.")
      })?,
    };

    let contents = std::fs::read_to_string(&path)
      .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
    Self::parse(&contents).wrap_err_with(|| format!("Invalid config file {}", path.display()))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.version.is_empty() {
      return Err(eyre!("`version` must not be empty"));
    }
    if ttl_from_secs(config.api_ttl_secs).is_none() {
      return Err(eyre!("`api_ttl_secs` is out of range: {}", config.api_ttl_secs));
    }
    Ok(config)
  }

  pub fn static_store_name(&self) -> String {
    format!("{}-{}", self.stores.static_prefix, self.version)
  }

  pub fn runtime_store_name(&self) -> String {
    format!("{}-{}", self.stores.runtime_prefix, self.version)
  }

  /// API read TTL; values too large to represent saturate.
  pub fn api_ttl(&self) -> chrono::Duration {
    ttl_from_secs(self.api_ttl_secs).unwrap_or(chrono::Duration::MAX)
  }

  pub fn network_timeout(&self) -> Duration {
    Duration::from_secs(self.network_timeout_secs)
  }

  /// Resolve a path or absolute URL against the configured origin.
  pub fn resolve(&self, path_or_url: &str) -> Result<Url> {
    self
      .origin
      .join(path_or_url)
      .map_err(|e| eyre!("Invalid URL {}: {}", path_or_url, e))
  }
}

/// Candidate config files, in search order.
fn search_paths() -> Vec<PathBuf> {
  let mut paths = vec![PathBuf::from("offcache.yaml")];
  paths.extend(db::config_dir().map(|dir| dir.join("config.yaml")));
  paths
}

fn ttl_from_secs(secs: u64) -> Option<chrono::Duration> {
  i64::try_from(secs)
    .ok()
    .and_then(chrono::Duration::try_seconds)
}
