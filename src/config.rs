//! Config loading and persistence.
//!
//! The bearer credential is deliberately NOT part of the config file; it is
//! read from the environment at use and never written to disk.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Effect, Transience};
use crate::git;

pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to write {path}: {reason}")]
    Write { path: PathBuf, reason: String },
}

impl ConfigError {
    pub fn transience(&self) -> Transience {
        match self {
            ConfigError::Parse { .. } => Transience::Permanent,
            ConfigError::Read { .. } | ConfigError::Write { .. } => Transience::Unknown,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            // Writes go through a temp file rename.
            ConfigError::Write { .. } => Effect::Unknown,
            _ => Effect::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub github: GithubConfig,
    pub store: StoreConfig,
    pub aggregate: AggregateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GithubConfig {
    /// REST endpoint for commit history reads.
    pub api_base: String,
    /// Base every registered `owner/name` is cloned under.
    pub git_base: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: crate::remote::DEFAULT_API_BASE.to_string(),
            git_base: "https://github.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Working clone to publish from; defaults to the data directory.
    pub repo_path: Option<PathBuf>,
    pub branch: String,
    pub remote: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            repo_path: None,
            branch: git::DEFAULT_BRANCH.to_string(),
            remote: git::DEFAULT_REMOTE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AggregateConfig {
    /// Per-source clone budget when pulling all registered logs.
    pub clone_timeout_ms: u64,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            clone_timeout_ms: crate::pull::DEFAULT_CLONE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl StoreConfig {
    pub fn repo_path(&self) -> PathBuf {
        self.repo_path
            .clone()
            .unwrap_or_else(crate::paths::store_dir)
    }
}

/// Bearer credential from the environment, if present.
pub fn github_token() -> Option<String> {
    std::env::var(TOKEN_ENV)
        .ok()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

pub fn config_path() -> PathBuf {
    crate::paths::config_dir().join("config.toml")
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the config, writing defaults on first run. Parse failures fall back
/// to defaults with a warning rather than blocking every command.
pub fn load_or_init() -> Config {
    let path = config_path();
    if path.exists() {
        match load(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                tracing::warn!("config load failed, using defaults: {e}");
                return Config::default();
            }
        }
    }

    let cfg = Config::default();
    if let Err(e) = write_config(&path, &cfg) {
        tracing::warn!("failed to write default config: {e}");
    }
    cfg
}

pub fn write_config(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    let write_err = |reason: String| ConfigError::Write {
        path: path.to_path_buf(),
        reason,
    };
    let dir = path
        .parent()
        .ok_or_else(|| write_err("path missing parent directory".to_string()))?;
    fs::create_dir_all(dir).map_err(|e| write_err(format!("creating {}: {e}", dir.display())))?;

    let contents =
        toml::to_string_pretty(cfg).map_err(|e| write_err(format!("rendering toml: {e}")))?;
    let temp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| write_err(format!("creating temp file: {e}")))?;
    fs::write(temp.path(), contents.as_bytes())
        .map_err(|e| write_err(format!("writing temp file: {e}")))?;
    temp.persist(path)
        .map_err(|e| write_err(format!("persisting: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let cfg = Config {
            github: GithubConfig {
                api_base: "https://ghe.example.com/api/v3".to_string(),
                git_base: "https://ghe.example.com".to_string(),
            },
            store: StoreConfig {
                repo_path: Some(PathBuf::from("/srv/chatlog")),
                branch: "trunk".to_string(),
                remote: "upstream".to_string(),
            },
            aggregate: AggregateConfig {
                clone_timeout_ms: 1_500,
            },
        };

        write_config(&path, &cfg).expect("write");
        let loaded = load(&path).expect("load");
        assert_eq!(loaded, cfg);

        // The credential never appears in the rendered file.
        let text = fs::read_to_string(&path).expect("read");
        assert!(!text.to_lowercase().contains("token"));
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[store]\nbranch = \"trunk\"\n").expect("write");

        let cfg = load(&path).expect("load");
        assert_eq!(cfg.store.branch, "trunk");
        assert_eq!(cfg.store.remote, git::DEFAULT_REMOTE);
        assert_eq!(cfg.github, GithubConfig::default());
        assert_eq!(cfg.aggregate, AggregateConfig::default());
    }
}
