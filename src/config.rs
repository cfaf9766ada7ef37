use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{olog_debug, Error, Result};

fn default_approval_timeout_secs() -> u64 {
    900
}

fn default_max_concurrency() -> usize {
    4
}

fn default_max_steps() -> usize {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seconds a task may sit in awaiting_approval before escalating.
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
    /// Maximum number of steps a single task may run concurrently.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Maximum number of steps accepted in a plan.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Contact notified when approval is requested.
    pub primary_contact: Option<String>,
    /// Higher-tier contact notified on escalation.
    pub escalation_contact: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            approval_timeout_secs: default_approval_timeout_secs(),
            max_concurrency: default_max_concurrency(),
            max_steps: default_max_steps(),
            primary_contact: None,
            escalation_contact: None,
        }
    }
}

impl Config {
    pub fn opsflow_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".opsflow"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::opsflow_dir()?.join("opsflow.toml"))
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        olog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            olog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        olog_debug!(
            "Config loaded: approval_timeout_secs={}, max_concurrency={}, max_steps={}",
            config.approval_timeout_secs,
            config.max_concurrency,
            config.max_steps
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let opsflow_dir = Self::opsflow_dir()?;
        olog_debug!("Config::save dir={}", opsflow_dir.display());
        if !opsflow_dir.exists() {
            fs::create_dir_all(&opsflow_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        olog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}
