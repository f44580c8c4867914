use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::fetch::FetchConfig;
use crate::processor::{AdvancePolicy, ProcessOptions};

const APP_DIR: &str = "feedmark";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Watermark store location; `<data dir>/rss/latest.json` when unset.
    pub db_file: Option<PathBuf>,
    /// 0 = normal, 1 = debug, 2+ = trace.
    pub debug_level: u8,
    /// Process feeds but never write the store.
    pub dry_run: bool,
    pub force: bool,
    pub feeds: Vec<String>,
    pub request_timeout_seconds: u64,
    pub max_redirects: usize,
    pub user_agent: String,
    pub advance_policy: AdvancePolicy,
}

impl Default for Config {
    fn default() -> Self {
        let fetch = FetchConfig::default();
        Self {
            db_file: None,
            debug_level: 0,
            dry_run: false,
            force: false,
            feeds: Vec::new(),
            request_timeout_seconds: fetch.request_timeout.as_secs(),
            max_redirects: fetch.max_redirects,
            user_agent: fetch.user_agent,
            advance_policy: AdvancePolicy::default(),
        }
    }
}

impl Config {
    /// `<config dir>/feedmark/config.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join(APP_DIR).join("config.json"))
    }

    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn store_path(&self) -> PathBuf {
        self.db_file.clone().unwrap_or_else(default_store_path)
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
            max_redirects: self.max_redirects,
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn process_options(&self) -> ProcessOptions {
        ProcessOptions {
            force: self.force,
            advance_policy: self.advance_policy,
        }
    }
}

/// `<data home>/rss/latest.json`, e.g. `~/.local/share/rss/latest.json` on Linux.
pub fn default_store_path() -> PathBuf {
    let data_home = dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("."));
    data_home.join("rss").join("latest.json")
}
