use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Catalogue root, e.g. https://www.anapioficeandfire.com/api
  pub base_url: String,
  /// Cover lookup root; the ISBN is appended as a path segment
  pub cover_url: String,
  /// Records per page, for both remote requests and local reads
  pub page_size: usize,
  /// Per-request timeout
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "https://www.anapioficeandfire.com/api".to_string(),
      cover_url: "https://bookcover.longitood.com/bookcover".to_string(),
      page_size: 50,
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Database file (defaults to $XDG_DATA_HOME/gotwiki/cache.db)
  pub path: Option<PathBuf>,
  /// Age after which cached books are refreshed on read
  pub book_stale_secs: u64,
  /// Concurrent cover and book lookups per batch
  pub cover_concurrency: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      path: None,
      book_stale_secs: 60,
      cover_concurrency: 8,
    }
  }
}

impl CacheConfig {
  /// Resolve the database path.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.path {
      Some(path) => Ok(path.clone()),
      None => Ok(data_dir()?.join("cache.db")),
    }
  }
}

/// Per-user data directory for the cache database and logs.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("gotwiki"))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./gotwiki.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/gotwiki/config.yaml
  ///
  /// Without a config file the defaults point at the public catalogue.
  /// `GOTWIKI_API_URL` overrides the catalogue root either way.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        debug!("No configuration file found, using defaults");
        Config::default()
      }
    };

    if let Ok(url) = std::env::var("GOTWIKI_API_URL") {
      config.api.base_url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("gotwiki.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("gotwiki").join("config.yaml");
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

    debug!(path = %path.display(), "Loaded configuration");
    Ok(config)
  }
}
