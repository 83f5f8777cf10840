use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub reminders: RemindersConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Where the timer service listens (default: $XDG_RUNTIME_DIR/opassist.sock)
  pub socket_path: Option<PathBuf>,
  /// Where timer state, cache and logs are kept (default: $XDG_DATA_HOME/opassist)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
  /// Base URL of the OpenProject server, e.g. "https://op.example.com"
  pub url: Option<String>,
  /// API key; the OPASSIST_API_KEY / OPENPROJECT_API_KEY environment
  /// variables take precedence
  pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemindersConfig {
  #[serde(default)]
  pub enabled: bool,
  #[serde(default = "default_first_delay_secs")]
  pub first_delay_secs: u64,
  #[serde(default = "default_period_secs")]
  pub period_secs: u64,
}

fn default_first_delay_secs() -> u64 {
  60
}

fn default_period_secs() -> u64 {
  24 * 60 * 60
}

impl Default for RemindersConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      first_delay_secs: default_first_delay_secs(),
      period_secs: default_period_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// How long cached collections are served without refetching
  #[serde(default = "default_max_age_secs")]
  pub max_age_secs: u64,
}

fn default_max_age_secs() -> u64 {
  5 * 60
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_age_secs: default_max_age_secs(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./opassist.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/opassist/config.yaml
  ///
  /// Without a file the defaults are used; operations that need the server
  /// report the missing settings when they run.
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
        debug!("No configuration file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("opassist.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("opassist").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self> {
    // An empty file is a valid, all-default configuration
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  /// The API key, from the environment or the config file.
  ///
  /// Checks OPASSIST_API_KEY first, then OPENPROJECT_API_KEY.
  pub fn api_key(&self) -> Option<String> {
    let from_env = std::env::var("OPASSIST_API_KEY")
      .or_else(|_| std::env::var("OPENPROJECT_API_KEY"))
      .ok();
    pick_api_key(from_env, self.server.api_key.clone())
  }

  /// Directory for timer state, cache and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("opassist"))
  }

  /// Path of the timer service socket.
  pub fn socket_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.socket_path {
      return Ok(path.clone());
    }

    match dirs::runtime_dir() {
      Some(dir) => Ok(dir.join("opassist.sock")),
      None => Ok(self.data_dir()?.join("opassist.sock")),
    }
  }

  pub fn cache_max_age(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.cache.max_age_secs as i64)
  }
}

/// Environment wins over the file; blank values count as unset.
fn pick_api_key(from_env: Option<String>, from_file: Option<String>) -> Option<String> {
  from_env
    .filter(|k| !k.trim().is_empty())
    .or_else(|| from_file.filter(|k| !k.trim().is_empty()))
}
