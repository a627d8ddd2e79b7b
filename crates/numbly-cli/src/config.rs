//! CLI settings: flags and environment override the config file, which
//! overrides defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_URL: &str = "http://localhost:8787";
pub const DEFAULT_DB: &str = "numbly.db";

/// Shape of the optional TOML config file.
#[derive(Deserialize, Default, Debug, PartialEq, Eq)]
pub struct ConfigFile {
  #[serde(default)]
  pub url:     String,
  #[serde(default)]
  pub db_path: Option<PathBuf>,
}

impl ConfigFile {
  pub fn read(path: &Path) -> Result<Self> {
    let raw = std::fs::read_to_string(path)
      .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).context("parsing config file")
  }
}

/// Effective settings after layering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
  pub url:     String,
  pub db_path: PathBuf,
}

impl Settings {
  pub fn resolve(url: Option<String>, db: Option<PathBuf>, file: ConfigFile) -> Self {
    Self {
      url:     url
        .or_else(|| (!file.url.is_empty()).then_some(file.url))
        .unwrap_or_else(|| DEFAULT_URL.to_string()),
      db_path: db
        .or(file.db_path)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn flags_beat_file_beat_defaults() {
    let file: ConfigFile =
      toml::from_str("url = \"https://sync.example\"\ndb_path = \"/tmp/n.db\"").unwrap();

    let from_file = Settings::resolve(None, None, file);
    assert_eq!(from_file.url, "https://sync.example");
    assert_eq!(from_file.db_path, PathBuf::from("/tmp/n.db"));

    let file: ConfigFile = toml::from_str("url = \"https://sync.example\"").unwrap();
    let flagged = Settings::resolve(Some("http://127.0.0.1:9000".into()), None, file);
    assert_eq!(flagged.url, "http://127.0.0.1:9000");
    assert_eq!(flagged.db_path, PathBuf::from(DEFAULT_DB));

    let defaults = Settings::resolve(None, None, ConfigFile::default());
    assert_eq!(defaults.url, DEFAULT_URL);
  }
}
