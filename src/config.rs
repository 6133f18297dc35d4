use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::{clog_debug, Error, Result};

/// Browser-transport connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_connect_timeout")]
    pub timeout_secs: f64,
    #[serde(default = "default_connect_retries")]
    pub max_retries: u32,
}

fn default_server_url() -> String {
    "stdio://playwright-mcp".to_string()
}

fn default_connect_timeout() -> f64 {
    30.0
}

fn default_connect_retries() -> u32 {
    3
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            timeout_secs: default_connect_timeout(),
            max_retries: default_connect_retries(),
        }
    }
}

/// Manual login flow settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Time allowed for manual login, in seconds.
    #[serde(default = "default_auth_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: f64,
    #[serde(default)]
    pub headless: bool,
}

fn default_auth_timeout() -> u64 {
    300
}

fn default_check_interval() -> f64 {
    2.0
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_auth_timeout(),
            check_interval_secs: default_check_interval(),
            headless: false,
        }
    }
}

/// Task execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum number of tasks to run in parallel (1-10).
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default)]
    pub parallel_mode: bool,
}

fn default_max_parallel() -> usize {
    1
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            parallel_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    pub default_repository: Option<String>,
}

impl Config {
    pub fn conductor_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".conductor"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::conductor_dir()?.join("conductor.toml"))
    }

    pub fn sessions_path() -> Result<PathBuf> {
        Ok(Self::conductor_dir()?.join("sessions.jsonl"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        clog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            clog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        config.validate()?;
        clog_debug!(
            "Config loaded: max_parallel={}, server_url={}, default_repository={:?}",
            config.execution.max_parallel,
            config.connection.server_url,
            config.default_repository
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let conductor_dir = Self::conductor_dir()?;
        if !conductor_dir.exists() {
            clog_debug!("Creating conductor directory: {}", conductor_dir.display());
            fs::create_dir_all(&conductor_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        clog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn ensure_dirs() -> Result<()> {
        let conductor_dir = Self::conductor_dir()?;
        if !conductor_dir.exists() {
            fs::create_dir_all(&conductor_dir)?;
        }
        Ok(())
    }

    /// Reject settings outside the supported ranges.
    pub fn validate(&self) -> Result<()> {
        if self.execution.max_parallel < 1 || self.execution.max_parallel > 10 {
            return Err(Error::Validation(format!(
                "execution.max_parallel must be between 1 and 10, got {}",
                self.execution.max_parallel
            )));
        }
        if self.connection.max_retries < 1 {
            return Err(Error::Validation(
                "connection.max_retries must be at least 1".to_string(),
            ));
        }
        if let Some(repo) = &self.default_repository {
            if !crate::loader::is_valid_repository(repo) {
                return Err(Error::Validation(format!(
                    "default_repository must be in owner/repo format, got: {}",
                    repo
                )));
            }
        }
        Ok(())
    }
}
