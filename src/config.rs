use std::path::{Path, PathBuf};

use dirs::home_dir;
use log::error;

use crate::remote::DEFAULT_PORT;
use crate::state::DEFAULT_LOCALE;
use crate::uri::UriOptions;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Config {
  pub config_path: Option<PathBuf>,
  /// Locale of new sessions until a URL sets `hl`.
  pub locale: Option<String>,
  pub port: Option<u16>,
  /// The layer tree served when none is given on the command line.
  pub tree_path: Option<PathBuf>,
  #[serde(default)]
  pub uri: UriOptions,
}

impl Config {
  #[must_use]
  pub fn new() -> Self {
    let from_env = Self::from_env();
    let from_file = Self::from_file();
    let default = Self::default();

    let mut merged = from_env;
    if let Some(from_file) = &from_file {
      merged = merged.merge(from_file);
    }
    merged = merged.merge(&default);

    if merged.config_path.is_some() && from_file.is_none() {
      merged.init_cfg_file();
    }

    merged
  }

  #[must_use]
  pub fn locale(&self) -> &str {
    self.locale.as_deref().unwrap_or(DEFAULT_LOCALE)
  }

  #[must_use]
  pub fn port(&self) -> u16 {
    self.port.unwrap_or(DEFAULT_PORT)
  }

  fn from_env() -> Self {
    let port = std::env::var("MAPSTATE_PORT").ok().and_then(|p| {
      p.parse::<u16>()
        .inspect_err(|e| error!("Ignoring MAPSTATE_PORT {p:?}: {e}"))
        .ok()
    });

    Self {
      config_path: std::env::var("MAPSTATE_CONFIG").ok().map(PathBuf::from),
      locale: std::env::var("MAPSTATE_LOCALE").ok(),
      port,
      tree_path: std::env::var("MAPSTATE_TREE").ok().map(PathBuf::from),
      uri: UriOptions::default(),
    }
  }

  fn merge(mut self, other: &Self) -> Self {
    self.config_path = self.config_path.or(other.config_path.clone());
    self.locale = self.locale.or(other.locale.clone());
    self.port = self.port.or(other.port);
    self.tree_path = self.tree_path.or(other.tree_path.clone());

    // The environment cannot set uri options, so a non-default value always wins.
    if self.uri == UriOptions::default() {
      self.uri = other.uri;
    }

    self
  }

  fn from_file() -> Option<Self> {
    let config_path = std::env::var("MAPSTATE_CONFIG")
      .ok()
      .map(PathBuf::from)
      .or_else(|| home_dir().map(|p| p.join(".config").join("mapstate")))?;
    Self::load(&config_path.join("config.json"))
  }

  /// Reads a config file. Missing files yield `None`, unreadable ones are logged.
  #[must_use]
  pub fn load(path: &Path) -> Option<Self> {
    serde_json::from_str(&std::fs::read_to_string(path).ok()?)
      .inspect_err(|e| error!("Failed to read config file: {e}"))
      .ok()
  }

  fn init_cfg_file(&self) {
    if let Some(path) = &self.config_path {
      if !path.exists() {
        let _ = std::fs::create_dir_all(path).inspect_err(|e| {
          error!("Failed to create config directory: {e}");
        });
      }

      let path = path.join("config.json");
      if !path.exists() {
        let config = serde_json::to_string_pretty(self);
        if let Ok(config) = config {
          let _ = std::fs::write(path, config).inspect_err(|e| {
            error!("Failed to write config file: {e}");
          });
        } else {
          error!("Failed to serialize config");
        }
      }
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      config_path: home_dir().map(|p| p.join(".config").join("mapstate")),
      locale: Some(DEFAULT_LOCALE.to_string()),
      port: Some(DEFAULT_PORT),
      tree_path: None,
      uri: UriOptions::default(),
    }
  }
}
