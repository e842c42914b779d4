//! parqueue configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::scheduler::QueueConfig;

/// Project-local config file, relative to the working directory
const LOCAL_CONFIG: &str = ".parqueue.yml";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Queue behaviour
    pub queue: QueueConfig,

    /// Log level used when no `--log-level` flag is given
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        self.queue.validate()?;
        Ok(())
    }

    /// Files consulted when no `--config` is given, highest priority first:
    /// `.parqueue.yml` in the working directory, then `parqueue/parqueue.yml`
    /// under the platform config directory.
    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("parqueue").join("parqueue.yml"));
        }
        paths
    }

    /// Load `config_path` if given; it must exist and parse. Otherwise the
    /// first candidate that parses wins, and defaults apply when none does.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }
        Ok(Self::load_first(&Self::candidate_paths()))
    }

    fn load_first(paths: &[PathBuf]) -> Self {
        for path in paths.iter().filter(|path| path.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => warn!(path = %path.display(), error = %e, "Config::load: skipping unusable config file"),
            }
        }
        debug!("Config::load: no config file found, queue defaults apply");
        Self::default()
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        debug!(path = %path.as_ref().display(), "Config::load_from_file: loaded");
        Ok(config)
    }
}
