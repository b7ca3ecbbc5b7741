use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CachePolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Collection shown when none is given on the command line
  #[serde(default = "default_resource")]
  pub default_resource: String,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub overlay: OverlayConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub url: String,
  /// Environment variable holding the session token
  #[serde(default = "default_token_env")]
  pub token_env: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
  pub stale_after_ms: u64,
  pub expires_after_ms: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_after_ms: 30_000,
      expires_after_ms: 300_000,
    }
  }
}

impl CacheConfig {
  pub fn policy(&self) -> Result<CachePolicy> {
    CachePolicy::from_millis(self.stale_after_ms, self.expires_after_ms)
      .map_err(|e| eyre!("Invalid cache configuration: {}", e))
  }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OverlayConfig {
  /// Delay before refetching a list after a write action
  pub refetch_delay_ms: u64,
  /// Quiet period before a typed search is sent to the server
  pub search_debounce_ms: u64,
  pub page_size: usize,
}

impl Default for OverlayConfig {
  fn default() -> Self {
    Self {
      refetch_delay_ms: 600,
      search_debounce_ms: 300,
      page_size: 20,
    }
  }
}

impl OverlayConfig {
  pub fn refetch_delay(&self) -> Duration {
    Duration::from_millis(self.refetch_delay_ms)
  }

  pub fn search_debounce(&self) -> Duration {
    Duration::from_millis(self.search_debounce_ms)
  }
}

fn default_resource() -> String {
  "requests".to_string()
}

fn default_token_env() -> String {
  "ADMIN_SYNC_TOKEN".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./admin-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/admin-sync/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/admin-sync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("admin-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("admin-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  /// Parse and validate a YAML document.
  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.cache.policy()?;
    Ok(config)
  }
}
