use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin of the backend this coordinator fronts (scheme + host + port).
  /// Requests to any other origin are passed through untouched.
  pub origin: String,
  #[serde(default)]
  pub cache: CacheSettings,
  #[serde(default)]
  pub routes: RouteConfig,
  #[serde(default)]
  pub shell: ShellConfig,
  #[serde(default)]
  pub sync: SyncSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheSettings {
  /// Deployment generation tag. Supplied by the deploy process; bumping it
  /// invalidates every partition from the previous generation on `activate`.
  pub version: Option<String>,
  /// Directory for the cache/outbox database (defaults to the user data dir)
  pub dir: Option<PathBuf>,
}

/// URL classification rules, evaluated in a fixed priority order:
/// API prefix, then document, then asset, then navigation.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  #[serde(default = "default_document_prefixes")]
  pub document_prefixes: Vec<String>,
  #[serde(default = "default_document_extensions")]
  pub document_extensions: Vec<String>,
  #[serde(default = "default_asset_prefixes")]
  pub asset_prefixes: Vec<String>,
  #[serde(default = "default_asset_extensions")]
  pub asset_extensions: Vec<String>,
}

impl Default for RouteConfig {
  fn default() -> Self {
    Self {
      api_prefix: default_api_prefix(),
      document_prefixes: default_document_prefixes(),
      document_extensions: default_document_extensions(),
      asset_prefixes: default_asset_prefixes(),
      asset_extensions: default_asset_extensions(),
    }
  }
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

fn default_document_prefixes() -> Vec<String> {
  vec!["/documents/".to_string(), "/drawings/".to_string()]
}

fn default_document_extensions() -> Vec<String> {
  ["pdf", "dwg", "dxf", "doc", "docx", "xls", "xlsx"]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_asset_prefixes() -> Vec<String> {
  vec![
    "/static/".to_string(),
    "/assets/".to_string(),
    "/icons/".to_string(),
  ]
}

fn default_asset_extensions() -> Vec<String> {
  [
    "js", "css", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2", "ttf",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
  /// App-shell manifest: paths fetched all-or-nothing during `precache`
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
}

impl Default for ShellConfig {
  fn default() -> Self {
    Self {
      manifest: default_manifest(),
    }
  }
}

fn default_manifest() -> Vec<String> {
  vec![
    "/".to_string(),
    "/offline.html".to_string(),
    "/manifest.json".to_string(),
  ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
  /// Seconds between connectivity probes in `watch` mode
  #[serde(default = "default_probe_interval")]
  pub probe_interval_secs: u64,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      probe_interval_secs: default_probe_interval(),
    }
  }
}

fn default_probe_interval() -> u64 {
  30
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offsite.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offsite/config.yaml
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
        "No configuration file found. Create one at ~/.config/offsite/config.yaml\n\
                 with at least an `origin:` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offsite.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offsite").join("config.yaml");
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

  /// Parsed backend origin.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Active cache generation tag.
  ///
  /// Resolution order: OFFSITE_CACHE_VERSION env var (deploy-supplied),
  /// then the config file, then the crate version.
  pub fn version_tag(&self) -> String {
    std::env::var("OFFSITE_CACHE_VERSION")
      .ok()
      .or_else(|| self.cache.version.clone())
      .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
  }
}
